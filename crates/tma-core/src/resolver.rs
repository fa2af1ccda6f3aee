use rand::Rng;

/// Environment pools for desktop-origin clients. A freshly converted
/// desktop session gets a plausible environment sampled from these;
/// native-origin sessions keep whatever their stored credential says.
pub const SYSTEM_VERSIONS: [&str; 2] = ["Windows 10", "Windows 11"];

pub const APP_VERSIONS: [&str; 26] = [
    "5.3.1", "5.3.0", "5.2.3", "5.2.2", "5.2.0", "5.1.8", "5.1.7", "5.1.6", "5.1.5", "5.1.4",
    "5.1.3", "5.1.2", "5.1.1", "5.1.0", "5.0.0", "4.16.10", "4.16.9", "4.16.8", "4.16.7",
    "4.16.6", "4.16.5", "4.16.4", "4.16.3", "4.16.2", "4.16.1", "4.16.0",
];

const APP_VERSION_SUFFIX: &str = " x64";

/// Synthesized environment fields for a desktop-origin client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesktopEnv {
    pub system_version: String,
    pub app_version: String,
}

/// Sample a desktop environment. The randomness source is injected so
/// tests can pin deterministic choices.
pub fn sample_desktop_env(rng: &mut impl Rng) -> DesktopEnv {
    let system_version = SYSTEM_VERSIONS[rng.gen_range(0..SYSTEM_VERSIONS.len())].to_string();
    let app_version = format!(
        "{}{APP_VERSION_SUFFIX}",
        APP_VERSIONS[rng.gen_range(0..APP_VERSIONS.len())]
    );

    DesktopEnv {
        system_version,
        app_version,
    }
}
