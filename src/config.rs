use std::path::PathBuf;

/// Startup configuration. Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub loglevel: String,
    // Persistence
    pub dir: String,
    pub dbfilename: String,
    // Replication
    pub replicaof: Option<(String, u16)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            loglevel: "info".to_string(),
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
            replicaof: None,
        }
    }
}

impl Config {
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--port" => {
                    if i + 1 < args.len() {
                        if let Ok(p) = args[i + 1].parse() {
                            config.port = p;
                        }
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        config.bind = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--dir" => {
                    if i + 1 < args.len() {
                        config.dir = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--dbfilename" => {
                    if i + 1 < args.len() {
                        config.dbfilename = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--loglevel" => {
                    if i + 1 < args.len() {
                        config.loglevel = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--replicaof" | "--slaveof" => {
                    // Either `--replicaof "host port"` or `--replicaof host port`.
                    if i + 1 < args.len() {
                        if let Some((host, port)) = args[i + 1].split_once(' ') {
                            config.replicaof = parse_master(host, port);
                            i += 1;
                        } else if i + 2 < args.len() {
                            config.replicaof = parse_master(&args[i + 1], &args[i + 2]);
                            i += 2;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }

    /// Value of a parameter for CONFIG GET.
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_lowercase().as_str() {
            "bind" => Some(self.bind.clone()),
            "port" => Some(self.port.to_string()),
            "loglevel" => Some(self.loglevel.clone()),
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "replicaof" | "slaveof" => Some(
                self.replicaof
                    .as_ref()
                    .map(|(host, port)| format!("{host} {port}"))
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }
}

fn parse_master(host: &str, port: &str) -> Option<(String, u16)> {
    if host.eq_ignore_ascii_case("no") && port.eq_ignore_ascii_case("one") {
        return None;
    }
    let port = port.trim().parse().ok()?;
    Some((host.trim().to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&[]);
        assert_eq!(config.port, 6379);
        assert!(config.replicaof.is_none());
        assert_eq!(config.snapshot_path(), PathBuf::from("./dump.rdb"));
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::from_args(&args(&[
            "--dir", "/tmp/data", "--dbfilename", "snap.rdb", "--port", "6380",
        ]));
        assert_eq!(config.get("dir").as_deref(), Some("/tmp/data"));
        assert_eq!(config.get("DBFILENAME").as_deref(), Some("snap.rdb"));
        assert_eq!(config.port, 6380);
        assert_eq!(config.get("nonexistent"), None);
    }

    #[test]
    fn test_replicaof_forms() {
        let quoted = Config::from_args(&args(&["--replicaof", "localhost 6379", "--port", "6380"]));
        assert_eq!(quoted.replicaof, Some(("localhost".to_string(), 6379)));
        assert_eq!(quoted.port, 6380);

        let split = Config::from_args(&args(&["--replicaof", "10.0.0.1", "7000"]));
        assert_eq!(split.replicaof, Some(("10.0.0.1".to_string(), 7000)));

        let none = Config::from_args(&args(&["--replicaof", "no one"]));
        assert_eq!(none.replicaof, None);
    }
}
