use segscope::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../segscope.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.polling.interval_ms, 1000);
    assert_eq!(cfg.upload.extensions, vec!["dcm".to_string()]);
    assert!(!cfg.server.base_url.is_empty());
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[server]\nbase_url = \"http://x:1/\"\ntimeout_seconds = 5\n")
        .expect("parse TOML");
    assert_eq!(cfg.server.base(), "http://x:1");
    assert_eq!(cfg.polling.interval_ms, 1000);
    assert_eq!(cfg.export.out_dir, "exports");
}
