use chrono::Utc;
use log::info;
use std::io::Write;

/// Logger setup shared by the binaries.
pub struct WayfarerLogger;

impl WayfarerLogger {
    /// Initialize env_logger with a timestamped format. `RUST_LOG` wins over
    /// `default_level` when set.
    pub fn init(default_level: &str) {
        let env = env_logger::Env::default().default_filter_or(default_level);
        let result = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] [{}] [{}:{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init();

        if result.is_ok() {
            info!("Wayfarer logger initialized");
        }
    }
}

/// Shortens a secret for log output, never printing more than its head.
pub fn redact(secret: &str) -> String {
    let head: String = secret.chars().take(6).collect();
    if secret.chars().count() > 6 {
        format!("{}…", head)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn redact_hides_tail() {
        assert_eq!(redact("abcdefghijkl"), "abcdef…");
        assert_eq!(redact("abc"), "***");
    }
}
