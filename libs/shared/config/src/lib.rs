use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub app_env: String,
    pub server_port: u16,
    pub default_page_limit: usize,
    pub slot_generation_batch_size: usize,
    pub default_slot_duration: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            app_env: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string()),
            server_port: parse_or_default("SERVER_PORT", 3000),
            default_page_limit: parse_or_default("BILLING_DEFAULT_PAGE_LIMIT", 50),
            slot_generation_batch_size: parse_or_default("SLOT_GENERATION_BATCH_SIZE", 50),
            default_slot_duration: parse_or_default("DEFAULT_SLOT_DURATION_MINUTES", 30),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Production mode hides upstream error details from response bodies.
    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_flag_is_case_insensitive() {
        let mut config = AppConfig {
            supabase_url: "http://localhost".to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            app_env: "Production".to_string(),
            server_port: 3000,
            default_page_limit: 50,
            slot_generation_batch_size: 50,
            default_slot_duration: 30,
        };
        assert!(config.is_production());
        assert!(config.is_configured());

        config.app_env = "development".to_string();
        config.supabase_jwt_secret.clear();
        assert!(!config.is_production());
        assert!(!config.is_configured());
    }

    #[test]
    fn invalid_numbers_fall_back() {
        env::set_var("CLINIC_TEST_BATCH_SIZE", "lots");
        assert_eq!(parse_or_default::<usize>("CLINIC_TEST_BATCH_SIZE", 50), 50);
        env::set_var("CLINIC_TEST_BATCH_SIZE", " 25 ");
        assert_eq!(parse_or_default::<usize>("CLINIC_TEST_BATCH_SIZE", 50), 25);
        env::remove_var("CLINIC_TEST_BATCH_SIZE");
    }
}
