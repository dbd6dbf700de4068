use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::bucket::BucketConfig;
use crate::model::BucketSpec;
use crate::types::Point2;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub bucket: BucketSettings,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            bucket: BucketSettings::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;

    fn from_env() -> Self {
        let host_value =
            env_string("SPHERE_BUCKET_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse SPHERE_BUCKET_API_HOST ('{}'): {}. Using {}.",
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string("SPHERE_BUCKET_API_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    eprintln!(
                        "⚠️ SPHERE_BUCKET_API_PORT must not be 0. Using {}.",
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    eprintln!(
                        "⚠️ Could not parse SPHERE_BUCKET_API_PORT ('{}'): {}. Using {}.",
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Geometry and behavior of the bucket served by the API.
#[derive(Clone, Debug)]
pub struct BucketSettings {
    spec: BucketSpec,
    stacking: BucketConfig,
    animate_by_default: bool,
}

impl BucketSettings {
    pub const DEFAULT_WIDTH: f64 = 120.0;
    pub const DEFAULT_ANIMATE: bool = true;

    const RADIUS_VAR: &'static str = "SPHERE_BUCKET_SPHERE_RADIUS";
    const PROPORTION_VAR: &'static str = "SPHERE_BUCKET_USABLE_WIDTH_PROPORTION";
    const OFFSET_VAR: &'static str = "SPHERE_BUCKET_VERTICAL_OFFSET";
    const WIDTH_VAR: &'static str = "SPHERE_BUCKET_WIDTH";
    const ORIGIN_X_VAR: &'static str = "SPHERE_BUCKET_ORIGIN_X";
    const ORIGIN_Y_VAR: &'static str = "SPHERE_BUCKET_ORIGIN_Y";
    const CAPTION_VAR: &'static str = "SPHERE_BUCKET_CAPTION";
    const ANIMATE_VAR: &'static str = "SPHERE_BUCKET_ANIMATE";

    fn from_env() -> Self {
        let sphere_radius = load_f64_with_warning(
            Self::RADIUS_VAR,
            BucketConfig::DEFAULT_SPHERE_RADIUS,
            |value| value > 0.0,
            "must be greater than 0",
            "Warning: Adjusted sphere radius changes how many spheres fit per layer",
        );

        let usable_width_proportion = load_f64_with_warning(
            Self::PROPORTION_VAR,
            BucketConfig::DEFAULT_USABLE_WIDTH_PROPORTION,
            |value| value > 0.0 && value <= 1.0,
            "must be greater than 0 and at most 1",
            "Warning: Adjusted usable width narrows the bottom layer",
        );

        let vertical_offset = load_f64_with_warning(
            Self::OFFSET_VAR,
            BucketConfig::default_vertical_offset(sphere_radius),
            f64::is_finite,
            "must be a finite number",
            "Warning: Adjusted vertical offset moves the stack relative to the bucket",
        );

        let width = load_f64_with_warning(
            Self::WIDTH_VAR,
            Self::DEFAULT_WIDTH,
            |value| value > 0.0,
            "must be greater than 0",
            "Warning: Adjusted bucket width changes the pyramid capacity",
        );

        let origin = Point2::new(
            load_f64_with_warning(
                Self::ORIGIN_X_VAR,
                0.0,
                f64::is_finite,
                "must be a finite number",
                "Note: Bucket origin moved",
            ),
            load_f64_with_warning(
                Self::ORIGIN_Y_VAR,
                0.0,
                f64::is_finite,
                "must be a finite number",
                "Note: Bucket origin moved",
            ),
        );

        let animate_by_default = env_string(Self::ANIMATE_VAR)
            .and_then(|raw| parse_bool(&raw, Self::ANIMATE_VAR))
            .unwrap_or(Self::DEFAULT_ANIMATE);

        let stacking = BucketConfig::builder()
            .sphere_radius(sphere_radius)
            .usable_width_proportion(usable_width_proportion)
            .vertical_offset(vertical_offset)
            .build();

        let spec = BucketSpec::new(origin, width).unwrap_or_else(|err| {
            eprintln!("⚠️ Invalid bucket geometry: {}. Using defaults.", err);
            Self::default_spec()
        });
        let spec = match env_string(Self::CAPTION_VAR) {
            Some(caption) => spec.with_caption(caption),
            None => spec,
        };

        Self {
            spec,
            stacking,
            animate_by_default,
        }
    }

    fn default_spec() -> BucketSpec {
        BucketSpec {
            origin: Point2::zero(),
            width: Self::DEFAULT_WIDTH,
            caption: None,
        }
    }

    /// Returns the bucket geometry.
    pub fn spec(&self) -> &BucketSpec {
        &self.spec
    }

    /// Returns the stacking configuration.
    pub fn stacking(&self) -> BucketConfig {
        self.stacking
    }

    /// Whether spheres are animated into place when a request does not say.
    pub fn animate_by_default(&self) -> bool {
        self.animate_by_default
    }
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            spec: Self::default_spec(),
            stacking: BucketConfig::default(),
            animate_by_default: Self::DEFAULT_ANIMATE,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            eprintln!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            eprintln!(
                "⚠️ Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    interpret_f64(
        var_name,
        env_string(var_name),
        default,
        validator,
        invalid_hint,
        warning,
    )
}

fn interpret_f64(
    var_name: &str,
    raw: Option<String>,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match raw {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) => {
                if !validator(value) {
                    eprintln!(
                        "⚠️ {} contains invalid value '{}': {}. Using {}.",
                        var_name, raw, invalid_hint, default
                    );
                    default
                } else {
                    let tolerance = (default.abs().max(1.0)) * 1e-9;
                    if (value - default).abs() > tolerance {
                        println!("⚠️ {} ({} = {}).", warning, var_name, value);
                    }
                    value
                }
            }
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}
