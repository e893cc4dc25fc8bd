use super::*;
use tempfile::NamedTempFile;

#[test]
fn browser_config_validation() {
    let mut config = BrowserConfig::default();

    config.validate().expect("Default config should be valid");

    config.navigation_timeout_seconds = 0;
    assert!(config.validate().is_err());
    config.navigation_timeout_seconds = 400;
    assert!(config.validate().is_err());
    config.navigation_timeout_seconds = 30;

    config.max_tabs = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTabLimit(0))
    ));
    config.max_tabs = 4;

    config.window_width = 50;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidWindowDimensions(50, 720))
    ));
}

#[test]
fn default_timings() {
    let config = BrowserConfig::default();

    assert_eq!(config.navigation_timeout(), Duration::from_secs(30));
    assert_eq!(config.settle_delay(), Duration::from_secs(3));
    assert_eq!(config.content_wait(), Duration::from_secs(10));
}

#[test]
fn partial_toml_uses_defaults() {
    let config: BrowserConfig =
        toml::from_str("max_tabs = 2\nheadless = false").expect("should parse browser config");

    assert_eq!(config.max_tabs, 2);
    assert!(!config.headless);
    assert_eq!(config.navigation_timeout_seconds, 30);
}

#[tokio::test]
async fn tab_limit_bounds_permits() {
    let client = BrowserClient::new(BrowserConfig {
        max_tabs: 2,
        ..Default::default()
    });

    assert_eq!(client.semaphore.available_permits(), 2);
}

// Requires Chrome to be available
#[tokio::test]
async fn renders_local_page() {
    let client = BrowserClient::new(BrowserConfig {
        navigation_timeout_seconds: 10,
        settle_delay_ms: 200,
        content_wait_seconds: 1,
        max_tabs: 1,
        ..Default::default()
    });

    let html_content = r#"
    <!DOCTYPE html>
    <html>
    <head><title>Render Test</title></head>
    <body>
        <main><h1>Hello World</h1></main>
        <script>
            document.querySelector('main').innerHTML += '<p>JavaScript works!</p>';
        </script>
    </body>
    </html>
    "#;

    let temp_file = NamedTempFile::with_suffix(".html").expect("Failed to create temp file");
    std::fs::write(temp_file.path(), html_content).expect("Failed to write HTML");

    let file_url = format!("file://{}", temp_file.path().to_string_lossy());
    let url = Url::parse(&file_url).expect("Failed to parse file URL");

    match client.render(&url).await {
        Ok(content) => {
            assert!(content.contains("Hello World"));
            assert!(content.contains("JavaScript works!"));
        }
        Err(e) => {
            if e.to_string().contains("Chrome") || e.to_string().contains("browser") {
                eprintln!("Skipping test - Chrome not available: {}", e);
                return;
            }
            panic!("Unexpected error: {}", e);
        }
    }
}
