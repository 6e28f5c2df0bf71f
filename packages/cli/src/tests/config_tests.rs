use crate::config::{Config, ConfigError};
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::net::{IpAddr, Ipv4Addr};

const VARS: [&str; 6] = [
    "PORT",
    "BIND_ADDRESS",
    "CORS_ORIGIN",
    "DAYTONA_API_KEY",
    "DAYTONA_API_URL",
    "DAYTONA_TARGET",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 8000);
    assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(config.cors_origin, None);
    assert_eq!(config.daytona_api_key, None);
    assert_eq!(config.daytona_api_url, "https://app.daytona.io/api");
    assert_eq!(config.daytona_target, "us");
}

#[test]
#[serial]
fn test_config_from_env_with_all_custom() {
    clear_env();
    env::set_var("PORT", "3000");
    env::set_var("BIND_ADDRESS", "127.0.0.1");
    env::set_var("CORS_ORIGIN", "https://app.example.com");
    env::set_var("DAYTONA_API_KEY", "dtn_key");
    env::set_var("DAYTONA_API_URL", "https://daytona.internal/api");
    env::set_var("DAYTONA_TARGET", "eu");

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 3000);
    assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
    assert_eq!(config.cors_origin.as_deref(), Some("https://app.example.com"));

    let daytona = config.daytona_config();
    assert_eq!(daytona.api_key.as_deref(), Some("dtn_key"));
    assert_eq!(daytona.api_url, "https://daytona.internal/api");
    assert_eq!(daytona.target, "eu");

    clear_env();
}

#[test]
#[serial]
fn test_blank_optional_values_are_unset() {
    clear_env();
    env::set_var("DAYTONA_API_KEY", "   ");
    env::set_var("CORS_ORIGIN", "");
    env::set_var("DAYTONA_TARGET", "");

    let config = Config::from_env().unwrap();

    assert_eq!(config.daytona_api_key, None);
    assert_eq!(config.cors_origin, None);
    assert_eq!(config.daytona_target, "us");

    clear_env();
}

#[rstest]
#[case("not-a-number")]
#[case("70000")]
#[case("-1")]
#[serial]
fn test_config_invalid_port(#[case] port: &str) {
    clear_env();
    env::set_var("PORT", port);

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    clear_env();
}

#[test]
#[serial]
fn test_config_port_zero() {
    clear_env();
    env::set_var("PORT", "0");

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::PortOutOfRange(0))));
    clear_env();
}

#[test]
#[serial]
fn test_config_invalid_bind_address() {
    clear_env();
    env::set_var("BIND_ADDRESS", "localhost");

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::InvalidBindAddress(_))));
    clear_env();
}

#[test]
#[serial]
fn test_config_invalid_cors_origin() {
    clear_env();
    env::set_var("CORS_ORIGIN", "https://bad\norigin");

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::InvalidCorsOrigin(_))));
    clear_env();
}

#[test]
#[serial]
fn test_cli_port_overrides_env() {
    clear_env();
    env::set_var("PORT", "9000");

    let config = Config::from_env().unwrap().with_port(Some(9100)).unwrap();
    assert_eq!(config.port, 9100);

    let config = Config::from_env().unwrap().with_port(None).unwrap();
    assert_eq!(config.port, 9000);

    assert!(matches!(
        Config::from_env().unwrap().with_port(Some(0)),
        Err(ConfigError::PortOutOfRange(0))
    ));
    clear_env();
}
