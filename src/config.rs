use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    category::{Category, DEFAULT_CATEGORIES},
    retry::{RedeliveryPolicy, RetryConfig, Timeouts},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_dead_letter_queue_name")]
    pub dead_letter_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    pub database_url: Option<String>,
    #[serde(default = "default_known_categories")]
    pub known_categories: Vec<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub publish_timeout_ms: u64,

    pub server_port: Option<u16>,
}

fn default_dead_letter_queue_name() -> String {
    "notifications_dead_letter".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_known_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.rabbitmq_url.trim().is_empty() {
            return Err(anyhow!("RABBITMQ_URL must not be empty"));
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }
        if self.retry_backoff_multiplier == 0 {
            return Err(anyhow!("RETRY_BACKOFF_MULTIPLIER must be at least 1"));
        }
        if self.dead_letter_queue_name.starts_with("notifications_client_")
            || self.dead_letter_queue_name.starts_with("notifications_provider_")
            || self.dead_letter_queue_name.starts_with("notifications_admin_")
        {
            return Err(anyhow!(
                "DEAD_LETTER_QUEUE_NAME collides with the direct queue namespace"
            ));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy::new(self.max_delivery_attempts, &self.dead_letter_queue_name)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            publish: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        self.known_categories
            .iter()
            .map(Category::new)
            .filter(|c| !c.is_empty())
            .collect()
    }
}
