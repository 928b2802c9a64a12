use std::env;
use std::time::Duration;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long a cart may sit idle before the sweeper reclaims its stock.
    pub cart_expiry: Duration,
    /// Interval between expiry-sweeper runs.
    pub sweep_interval: Duration,
    /// ISO currency code sent to the payment processor, e.g. "usd".
    pub currency: String,
    /// Secret API key for the payment processor.
    pub stripe_secret_key: Option<String>,
    /// Shared secret used to verify webhook signatures. When unset, all
    /// webhook deliveries are rejected.
    pub stripe_webhook_secret: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let expiry_minutes: u64 = env_or("CART_EXPIRATION_MINUTES", "10");
        let sweep_seconds: u64 = env_or("SWEEP_INTERVAL_SECONDS", "60");

        Settings {
            cart_expiry: Duration::from_secs(expiry_minutes * 60),
            sweep_interval: Duration::from_secs(sweep_seconds),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
        }
    }

    pub fn cart_expiry_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cart_expiry).unwrap_or(chrono::Duration::minutes(10))
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> T
where
    T::Err: std::fmt::Debug,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|e| panic!("{} must be a valid value: {:?}", key, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let settings = Settings {
            cart_expiry: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            currency: "usd".to_string(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
        };
        assert_eq!(settings.cart_expiry_chrono(), chrono::Duration::minutes(10));
    }
}
