use std::{env, error::Error, fs, path::Path};

use serde::Deserialize;

#[derive(Deserialize)]
#[serde(default)]
struct RawConfig {
    portal_password: String,
    portal_timeout_seconds: u32,
    double_reset_window_seconds: u32,
    measurement_interval_seconds: u16,
    measurement_topic: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            portal_password: "password".into(),
            portal_timeout_seconds: 180,
            double_reset_window_seconds: 10,
            measurement_interval_seconds: 60,
            measurement_topic: "/sensors/measurements".into(),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Tell Cargo to rerun if toml changes
    println!("cargo:rerun-if-changed=cfg.toml");

    // cfg.toml is optional, every key has a default
    let raw: RawConfig = match fs::read_to_string("cfg.toml") {
        Ok(toml_str) => toml::from_str(&toml_str)?,
        Err(_) => RawConfig::default(),
    };

    if raw.portal_password.len() < 8 || raw.portal_password.len() > 63 {
        return Err("portal_password must be 8 to 63 characters (WPA2)".into());
    }
    if raw.measurement_interval_seconds == 0 {
        return Err("measurement_interval_seconds must be at least 1".into());
    }

    // Generate Rust code
    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("config.rs");
    let code = format!(
        r#"
        pub const BUILD_CONFIG: BuildConfig = BuildConfig {{
            portal_password: {pw:?},
            portal_timeout_seconds: {pt},
            double_reset_window_seconds: {drw},
            measurement_interval_seconds: {intv},
            measurement_topic: {topic:?},
        }};
    "#,
        pw = raw.portal_password,
        pt = raw.portal_timeout_seconds,
        drw = raw.double_reset_window_seconds,
        intv = raw.measurement_interval_seconds,
        topic = raw.measurement_topic,
    );

    fs::write(dest_path, code)?;
    Ok(())
}
