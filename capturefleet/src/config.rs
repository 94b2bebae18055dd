//! Configuration loading.
//!
//! Every setting here comes from an environment variable - there is no
//! config file layer, since the full set of knobs is small enough to live
//! entirely in the deployment's env. Loaded through `figment::providers::Env`
//! the same way `dwctl::config::Config` layers `Env::prefixed` on top of its
//! YAML file, minus the file.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aws_region: String,
    pub sqs_queue_url: String,
    pub s3_bucket_name: String,
    pub dynamodb_table_name: String,
    pub sqs_batch_size: usize,
    pub sqs_visibility_timeout: u64,
    pub sqs_wait_time_seconds: u64,
    pub screenshot_width: u32,
    pub screenshot_height: u32,
    pub screenshot_timeout: u64,
    pub log_level: String,
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws_region: "us-east-1".to_string(),
            sqs_queue_url: String::new(),
            s3_bucket_name: String::new(),
            dynamodb_table_name: String::new(),
            sqs_batch_size: 5,
            sqs_visibility_timeout: 300,
            sqs_wait_time_seconds: 20,
            screenshot_width: 1920,
            screenshot_height: 1080,
            screenshot_timeout: 30000,
            log_level: "info".to_string(),
            health_port: 8080,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(Config::default())).merge(Env::raw()).extract()
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.sqs_visibility_timeout)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.sqs_wait_time_seconds)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.screenshot_timeout)
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.health_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_when_env_unset() {
        Jail::expect_with(|_jail| {
            let config = Config::load().unwrap();
            assert_eq!(config.sqs_batch_size, 5);
            assert_eq!(config.sqs_visibility_timeout, 300);
            assert_eq!(config.log_level, "info");
            Ok(())
        });
    }

    #[test]
    fn env_vars_override_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("SQS_BATCH_SIZE", "10");
            jail.set_env("AWS_REGION", "eu-west-1");
            jail.set_env("LOG_LEVEL", "debug");

            let config = Config::load().unwrap();
            assert_eq!(config.sqs_batch_size, 10);
            assert_eq!(config.aws_region, "eu-west-1");
            assert_eq!(config.log_level, "debug");
            Ok(())
        });
    }
}
