use percent_encoding::percent_decode_str;

use crate::{
    domain::LaunchPayload,
    errors::Error,
    ports::{BotHistory, TelegramSession},
    Result,
};

/// Platform tag sent with every web-view request.
pub const PLATFORM: &str = "android";

const DATA_MARKER: &str = "tgWebAppData=";
const VERSION_MARKER: &str = "&tgWebAppVersion";

/// The fixed set of supported launch-data providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKey {
    Blum,
    Iceberg,
    Tapswap,
    Onewin,
    Banana,
    Clayton,
    Cats,
    Major,
    Tonstation,
    Horizon,
}

impl ProviderKey {
    /// Unknown service strings are an accepted-but-unhandled case, so
    /// this returns `None` rather than an error.
    pub fn parse(service: &str) -> Option<Self> {
        match service {
            "blum" => Some(Self::Blum),
            "iceberg" => Some(Self::Iceberg),
            "tapswap" => Some(Self::Tapswap),
            "onewin" => Some(Self::Onewin),
            "banana" => Some(Self::Banana),
            "clayton" => Some(Self::Clayton),
            "cats" => Some(Self::Cats),
            "major" => Some(Self::Major),
            "tonstation" => Some(Self::Tonstation),
            "horizon" => Some(Self::Horizon),
            _ => None,
        }
    }

    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            Self::Blum => &BLUM,
            Self::Iceberg => &ICEBERG,
            Self::Tapswap => &TAPSWAP,
            Self::Onewin => &ONEWIN,
            Self::Banana => &BANANA,
            Self::Clayton => &CLAYTON,
            Self::Cats => &CATS,
            Self::Major => &MAJOR,
            Self::Tonstation => &TONSTATION,
            Self::Horizon => &HORIZON,
        }
    }
}

/// How a provider expects the referral code on the web-view request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartParamEncoding {
    /// No start parameter on the request; the referral code travels in
    /// the `/start` handshake instead.
    Omit,
    /// The raw code.
    Raw,
    /// `referral=<code>`.
    ReferralPrefix,
}

/// One provider's request-construction strategy.
#[derive(Clone, Copy, Debug)]
pub struct ProviderSpec {
    pub bot: &'static str,
    /// Named mini-app, requested by short name. Mutually exclusive with
    /// `menu_url`.
    pub app_short_name: Option<&'static str>,
    /// Menu-button mini-app, requested by URL.
    pub menu_url: Option<&'static str>,
    pub needs_start_handshake: bool,
    pub start_param: StartParamEncoding,
}

static BLUM: ProviderSpec = ProviderSpec {
    bot: "BlumCryptoBot",
    app_short_name: None,
    menu_url: Some("https://telegram.blum.codes/"),
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static ICEBERG: ProviderSpec = ProviderSpec {
    bot: "IcebergAppBot",
    app_short_name: None,
    menu_url: Some("https://0xiceberg.com/webapp/"),
    needs_start_handshake: true,
    start_param: StartParamEncoding::Omit,
};

static TAPSWAP: ProviderSpec = ProviderSpec {
    bot: "tapswap_bot",
    app_short_name: None,
    menu_url: Some("https://app.tapswap.club/"),
    needs_start_handshake: true,
    start_param: StartParamEncoding::Omit,
};

static ONEWIN: ProviderSpec = ProviderSpec {
    bot: "token1win_bot",
    app_short_name: Some("start"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static BANANA: ProviderSpec = ProviderSpec {
    bot: "OfficialBananaBot",
    app_short_name: Some("banana"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::ReferralPrefix,
};

static CLAYTON: ProviderSpec = ProviderSpec {
    bot: "claytoncoinbot",
    app_short_name: Some("game"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static CATS: ProviderSpec = ProviderSpec {
    bot: "catsgang_bot",
    app_short_name: Some("join"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static MAJOR: ProviderSpec = ProviderSpec {
    bot: "major",
    app_short_name: Some("start"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static TONSTATION: ProviderSpec = ProviderSpec {
    bot: "tonstationgames_bot",
    app_short_name: Some("app"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

static HORIZON: ProviderSpec = ProviderSpec {
    bot: "HorizonLaunch_bot",
    app_short_name: Some("HorizonLaunch"),
    menu_url: None,
    needs_start_handshake: false,
    start_param: StartParamEncoding::Raw,
};

/// Probe whether a conversation with `bot` already exists. A failed
/// probe is reported as its own state and treated as "needs handshake"
/// by the executor.
pub async fn probe_bot_history(client: &mut dyn TelegramSession, bot: &str) -> BotHistory {
    match client.has_bot_history(bot).await {
        Ok(true) => BotHistory::Initialized,
        Ok(false) => BotHistory::Empty,
        Err(e) => {
            tracing::debug!(bot, error = %e, "history probe failed, assuming empty conversation");
            BotHistory::ProbeFailed
        }
    }
}

/// Execute the provider strategy for `service` and extract the launch
/// payload. Unknown services yield an empty payload.
pub async fn fetch_launch_payload(
    client: &mut dyn TelegramSession,
    service: &str,
    referral_code: Option<&str>,
) -> Result<LaunchPayload> {
    let Some(key) = ProviderKey::parse(service) else {
        tracing::info!(service, "unrecognized provider, returning empty payload");
        return Ok(LaunchPayload::none());
    };
    let spec = key.spec();
    let referral = referral_code.filter(|code| !code.is_empty());

    if spec.needs_start_handshake {
        let history = probe_bot_history(client, spec.bot).await;
        if history.needs_handshake() {
            let greeting = match referral {
                Some(code) => format!("/start {code}"),
                None => "/start".to_string(),
            };
            if let Err(e) = client.send_bot_message(spec.bot, &greeting).await {
                tracing::debug!(bot = spec.bot, error = %e, "start handshake send failed");
            }
        }
    }

    let start_param = match spec.start_param {
        StartParamEncoding::Omit => None,
        StartParamEncoding::Raw => referral.map(str::to_string),
        StartParamEncoding::ReferralPrefix => referral.map(|code| format!("referral={code}")),
    };

    let auth_url = match (spec.menu_url, spec.app_short_name) {
        (Some(url), _) => {
            client
                .request_menu_web_view(spec.bot, url, start_param.as_deref())
                .await?
        }
        (None, Some(short_name)) => {
            client
                .request_app_web_view(spec.bot, short_name, start_param.as_deref())
                .await?
        }
        (None, None) => {
            return Err(Error::External(format!(
                "provider {service} has no web-view strategy"
            )))
        }
    };

    let tg_web_app_data = extract_web_app_data(&auth_url)?;
    Ok(LaunchPayload {
        tg_web_app_data: Some(tg_web_app_data),
        auth_url: Some(auth_url),
    })
}

/// Pull the launch payload out of a web-view response URL. The bot
/// platform double-encodes it, so it is percent-decoded twice.
pub fn extract_web_app_data(auth_url: &str) -> Result<String> {
    let Some(start) = auth_url.find(DATA_MARKER) else {
        return Err(Error::External(
            "web-view URL carries no launch payload".to_string(),
        ));
    };
    let tail = &auth_url[start + DATA_MARKER.len()..];
    let raw = match tail.find(VERSION_MARKER) {
        Some(end) => &tail[..end],
        None => tail,
    };

    let once = percent_decode_str(raw).decode_utf8_lossy().into_owned();
    let twice = percent_decode_str(&once).decode_utf8_lossy().into_owned();
    Ok(twice)
}
