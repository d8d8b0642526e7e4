use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const RIR_EXTENDED_URLS: [&str; 5] = [
    "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-extended-latest",
    "https://ftp.arin.net/pub/stats/arin/delegated-arin-extended-latest",
    "https://ftp.apnic.net/stats/apnic/delegated-apnic-extended-latest",
    "https://ftp.lacnic.net/pub/stats/lacnic/delegated-lacnic-extended-latest",
    "https://ftp.afrinic.net/pub/stats/afrinic/delegated-afrinic-extended-latest",
];

const ASNAMES_URL: &str = "https://ftp.ripe.net/ripe/asnames/asn.txt";

const RIPE_SPLIT_DUMP: &str = "https://ftp.ripe.net/ripe/dbase/split";

#[derive(Debug, Clone, Serialize)]
pub struct WhoisLiteConfig {
    /// Path to the directory holding the whois database
    pub data_dir: String,

    /// Delegated-extended files, one per RIR
    pub extended_urls: Vec<String>,

    /// AS-name lists
    pub asnames_urls: Vec<String>,

    /// RPSL dumps (plain, `.gz` or `.bz2`)
    pub rpsl_urls: Vec<String>,

    /// Geolocation CSV feeds
    pub geolocation_urls: Vec<String>,

    /// HTTP connect timeout in seconds (default: 10)
    pub connect_timeout_secs: u64,

    /// HTTP response body download timeout in seconds (default: 600)
    pub read_timeout_secs: u64,
}

const EMPTY_CONFIG: &str = r#"### whoislite configuration file

### directory for the whois database
# data_dir = "~/.whoislite"

### feed sources, comma-separated; http(s) URLs or local paths
### .gz and .bz2 sources are decompressed on the fly
# extended_urls = "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-extended-latest"
# asnames_urls = "https://ftp.ripe.net/ripe/asnames/asn.txt"
# rpsl_urls = "https://ftp.ripe.net/ripe/dbase/split/ripe.db.aut-num.gz,https://ftp.ripe.net/ripe/dbase/split/ripe.db.route.gz"

### geolocation feeds: address,_,city,region,countryName,countryCode
### none are configured by default
# geolocation_urls = "/var/lib/whoislite/geolocations.csv"

### download timeouts (in seconds)
# connect_timeout_secs = 10
# read_timeout_secs = 600
"#;

fn home_dir() -> String {
    dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string())
}

fn default_rpsl_urls() -> Vec<String> {
    ["aut-num", "as-set", "organisation", "mntner", "role", "route", "route6"]
        .iter()
        .map(|t| format!("{}/ripe.db.{}.gz", RIPE_SPLIT_DUMP, t))
        .collect()
}

/// Split a comma-separated list, dropping empty entries
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    match path.strip_prefix('~') {
        Some(rest) => format!("{}{}", home_dir(), rest),
        None => path.to_string(),
    }
}

impl Default for WhoisLiteConfig {
    fn default() -> Self {
        Self {
            data_dir: format!("{}/.whoislite", home_dir()),
            extended_urls: RIR_EXTENDED_URLS.iter().map(|u| u.to_string()).collect(),
            asnames_urls: vec![ASNAMES_URL.to_string()],
            rpsl_urls: default_rpsl_urls(),
            geolocation_urls: vec![],
            connect_timeout_secs: 10,
            read_timeout_secs: 600,
        }
    }
}

impl WhoisLiteConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<WhoisLiteConfig> {
        let mut builder = Config::builder();

        let whoislite_dir = format!("{}/.whoislite", home_dir());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(whoislite_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create whoislite directory: {}", e))?;
                let p = format!("{}/whoislite.toml", whoislite_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g., `WHOISLITE_DATA_DIR=/srv/whois whoislite sync` sets the data directory
        builder = builder.add_source(config::Environment::with_prefix("WHOISLITE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let values = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_values(&values)
    }

    /// Build a configuration from raw key/value settings, defaults filling the gaps
    fn from_values(values: &HashMap<String, String>) -> Result<WhoisLiteConfig> {
        let mut config = WhoisLiteConfig::default();

        if let Some(dir) = values.get("data_dir") {
            config.data_dir = expand_home(dir.trim());
        }

        let lists = [
            ("extended_urls", &mut config.extended_urls),
            ("asnames_urls", &mut config.asnames_urls),
            ("rpsl_urls", &mut config.rpsl_urls),
            ("geolocation_urls", &mut config.geolocation_urls),
        ];
        for (key, target) in lists {
            if let Some(value) = values.get(key) {
                *target = parse_list(value);
            }
        }

        let seconds = |key: &str, default: u64| -> Result<u64> {
            match values.get(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("Invalid value for {}: '{}'", key, v)),
                None => Ok(default),
            }
        };
        config.connect_timeout_secs = seconds("connect_timeout_secs", config.connect_timeout_secs)?;
        config.read_timeout_secs = seconds("read_timeout_secs", config.read_timeout_secs)?;

        Ok(config)
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/whoislite.sqlite3", data_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.sqlite_path()),
            format!("Connect Timeout:    {} seconds", self.connect_timeout_secs),
            format!("Read Timeout:       {} seconds", self.read_timeout_secs),
        ];

        let feeds = [
            ("Extended", &self.extended_urls),
            ("AS Names", &self.asnames_urls),
            ("RPSL", &self.rpsl_urls),
            ("Geolocations", &self.geolocation_urls),
        ];
        for (name, urls) in feeds {
            lines.push(format!("{:<20}{} source(s)", format!("{}:", name), urls.len()));
            for url in urls {
                lines.push(format!("  - {}", url));
            }
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        format!("{}/.whoislite/whoislite.toml", home_dir())
    }
}

// =============================================================================
// Database Info Types (used by both config and database commands)
// =============================================================================

/// Information about the SQLite database
#[derive(Debug, Serialize, Clone)]
pub struct SqliteDatabaseInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub schema_initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[cfg(feature = "database")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<crate::database::StoreCounts>,
}

/// Get SQLite database information without creating or migrating the file
#[cfg(feature = "database")]
pub fn get_sqlite_info(config: &WhoisLiteConfig) -> SqliteDatabaseInfo {
    use crate::database::{DatabaseConn, SchemaManager, SchemaStatus, WhoisDatabase};

    let sqlite_path = config.sqlite_path();
    let exists = Path::new(&sqlite_path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&sqlite_path).ok().map(|m| m.len())
    } else {
        None
    };

    let mut info = SqliteDatabaseInfo {
        path: sqlite_path.clone(),
        exists,
        size_bytes,
        schema_initialized: false,
        schema_version: None,
        counts: None,
    };
    if !exists {
        return info;
    }

    let status = DatabaseConn::open_path(&sqlite_path)
        .and_then(|db| SchemaManager::new(&db.conn).check_status());
    match status {
        Ok(SchemaStatus::Current) => {
            info.schema_initialized = true;
            info.schema_version = Some(crate::database::SCHEMA_VERSION);
            info.counts = WhoisDatabase::open(&sqlite_path)
                .and_then(|db| db.counts())
                .ok();
        }
        Ok(SchemaStatus::NeedsMigration { from, .. }) => {
            info.schema_initialized = true;
            info.schema_version = Some(from);
        }
        Ok(SchemaStatus::Incompatible {
            database_version, ..
        }) => {
            info.schema_initialized = true;
            info.schema_version = Some(database_version);
        }
        Ok(SchemaStatus::NotInitialized) | Ok(SchemaStatus::Corrupted) | Err(_) => {}
    }
    info
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
