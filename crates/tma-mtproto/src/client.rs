use std::{
    fs,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use grammers_client::{Client, Config, InitParams, InvocationError};
use grammers_session::{PackedChat, Session};
use grammers_tl_types::{self as tl, Deserializable};
use serde_json::json;

use tma_core::{
    credential::{self, ApiCredential},
    domain::{ChannelRef, SessionDescriptor, SessionKind, UserProfile},
    errors::Error,
    ports::{Connector, ResolvedSession, TelegramSession},
    providers::PLATFORM,
    proxy::ProxyConfig,
    resolver::DesktopEnv,
    Result,
};

use crate::tdesktop::{self, DesktopAccount};

/// Client identity embedded in desktop sessions. Desktop storage does
/// not record api credentials, so converted sessions use the desktop
/// client's published identity plus the sampled environment.
const DESKTOP_API_ID: i32 = 2040;
const DESKTOP_API_HASH: &str = "b18441a1ff607e10a989891a5462e627";

/// RPC error names that mean the stored session itself is unusable.
const SESSION_ERROR_NAMES: [&str; 7] = [
    "AUTH_KEY_UNREGISTERED",
    "AUTH_KEY_INVALID",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
    "USER_DEACTIVATED_BAN",
    "PHONE_NUMBER_INVALID",
];

/// Production datacenter addresses, used when importing desktop
/// sessions that only carry auth keys.
const DC_ADDRESSES: [(i32, Ipv4Addr); 5] = [
    (1, Ipv4Addr::new(149, 154, 175, 53)),
    (2, Ipv4Addr::new(149, 154, 167, 51)),
    (3, Ipv4Addr::new(149, 154, 175, 100)),
    (4, Ipv4Addr::new(149, 154, 167, 91)),
    (5, Ipv4Addr::new(91, 108, 56, 130)),
];

const DC_PORT: u16 = 443;

/// Production connector over the grammers MTProto client.
#[derive(Clone, Debug, Default)]
pub struct GrammersConnector;

impl GrammersConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for GrammersConnector {
    async fn open(
        &self,
        descriptor: &SessionDescriptor,
        proxy: &ProxyConfig,
        env: &DesktopEnv,
    ) -> Result<ResolvedSession> {
        match descriptor.kind {
            SessionKind::Tdata => {
                let account = tdesktop::load_account(&descriptor.desktop_path())?;
                let credential = desktop_credential(env)?;

                // Convert to the native format next to the desktop
                // directory so the rest of the request runs on it.
                write_native_session(&descriptor.native_path(), &account)?;

                Ok(ResolvedSession {
                    client: Box::new(GrammersSession::pending(
                        descriptor.native_path(),
                        credential.clone(),
                        proxy,
                    )),
                    credential,
                })
            }
            SessionKind::Native => {
                let credential = descriptor.credential.clone().ok_or_else(|| {
                    Error::SessionInvalid("descriptor carries no api credential".to_string())
                })?;

                let path = descriptor.native_path();
                if !path.is_file() {
                    return Err(Error::SessionInvalid(format!(
                        "session file missing: {}",
                        path.display()
                    )));
                }

                Ok(ResolvedSession {
                    client: Box::new(GrammersSession::pending(path, credential.clone(), proxy)),
                    credential,
                })
            }
        }
    }
}

/// One request's protocol client. Built disconnected; `connect`
/// authenticates with the stored session. Dropping the value tears the
/// transport down, which is what a timed-out (cancelled) flow relies on.
pub struct GrammersSession {
    session_path: PathBuf,
    credential: ApiCredential,
    proxy_url: String,
    client: Option<Client>,
}

impl GrammersSession {
    fn pending(session_path: PathBuf, credential: ApiCredential, proxy: &ProxyConfig) -> Self {
        Self {
            session_path,
            credential,
            proxy_url: proxy.as_url(),
            client: None,
        }
    }

    fn live(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::External("client is not connected".to_string()))
    }

    async fn bot_chat(&self, bot: &str) -> Result<PackedChat> {
        let client = self.live()?;
        let chat = client
            .resolve_username(bot)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| Error::External(format!("bot {bot} not found")))?;
        Ok(chat.pack())
    }
}

#[async_trait]
impl TelegramSession for GrammersSession {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let session = Session::load_file_or_create(&self.session_path)?;

        // Reconnection stays at the library default (none), and the
        // update queue is closed: this client only performs requests.
        let params = InitParams {
            device_model: self.credential.device_model.clone(),
            system_version: self.credential.system_version.clone(),
            app_version: self.credential.app_version.clone(),
            system_lang_code: self.credential.system_lang_code.clone(),
            lang_code: self.credential.lang_code.clone(),
            catch_up: false,
            update_queue_limit: Some(0),
            proxy_url: Some(self.proxy_url.clone()),
            ..InitParams::default()
        };

        let client = Client::connect(Config {
            session,
            api_id: self.credential.api_id,
            api_hash: self.credential.api_hash.clone(),
            params,
        })
        .await
        .map_err(|e| Error::Proxy(format!("failed to connect via proxy: {e}")))?;

        // Existing-session authentication only; a fresh login flow is
        // never started here.
        if !client.is_authorized().await.map_err(rpc_error)? {
            return Err(Error::SessionInvalid(
                "stored session is not authorized".to_string(),
            ));
        }

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Idempotent: a second call finds no client and does nothing.
        if let Some(client) = self.client.take() {
            client.session().save_to_file(&self.session_path)?;
        }
        Ok(())
    }

    async fn profile(&mut self) -> Result<UserProfile> {
        let client = self.live()?;
        let request = tl::functions::users::GetUsers {
            id: vec![tl::types::InputUserSelf {}.into()],
        };
        let mut users = client.invoke(&request).await.map_err(rpc_error)?;
        match users.pop() {
            Some(tl::enums::User::User(user)) => Ok(UserProfile {
                id: user.id,
                phone: user.phone,
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
            }),
            _ => Err(Error::SessionInvalid(
                "authenticated account not available".to_string(),
            )),
        }
    }

    async fn update_username(&mut self, username: &str) -> Result<()> {
        let request = tl::functions::account::UpdateUsername {
            username: username.to_string(),
        };
        self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(())
    }

    async fn send_bot_message(&mut self, bot: &str, text: &str) -> Result<()> {
        let packed = self.bot_chat(bot).await?;
        self.live()?
            .send_message(packed, text)
            .await
            .map_err(rpc_error)?;
        Ok(())
    }

    async fn has_bot_history(&mut self, bot: &str) -> Result<bool> {
        let packed = self.bot_chat(bot).await?;
        let mut messages = self.live()?.iter_messages(packed).limit(1);
        Ok(messages.next().await.map_err(rpc_error)?.is_some())
    }

    async fn request_menu_web_view(
        &mut self,
        bot: &str,
        url: &str,
        start_param: Option<&str>,
    ) -> Result<String> {
        let packed = self.bot_chat(bot).await?;
        let request = tl::functions::messages::RequestWebView {
            from_bot_menu: true,
            silent: false,
            compact: false,
            peer: input_peer_user(&packed),
            bot: input_user(&packed),
            url: Some(url.to_string()),
            start_param: start_param.map(str::to_string),
            theme_params: None,
            platform: PLATFORM.to_string(),
            reply_to: None,
            send_as: None,
        };
        let tl::enums::WebViewResult::Url(result) =
            self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(result.url)
    }

    async fn request_app_web_view(
        &mut self,
        bot: &str,
        short_name: &str,
        start_param: Option<&str>,
    ) -> Result<String> {
        let packed = self.bot_chat(bot).await?;
        let request = tl::functions::messages::RequestAppWebView {
            write_allowed: true,
            compact: false,
            peer: tl::types::InputPeerSelf {}.into(),
            app: tl::types::InputBotAppShortName {
                bot_id: input_user(&packed),
                short_name: short_name.to_string(),
            }
            .into(),
            start_param: start_param.map(str::to_string),
            theme_params: None,
            platform: PLATFORM.to_string(),
        };
        let tl::enums::WebViewResult::Url(result) =
            self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(result.url)
    }

    async fn resolve_channel(&mut self, identifier: &str) -> Result<ChannelRef> {
        let name = identifier
            .trim()
            .trim_start_matches("https://t.me/")
            .trim_start_matches("t.me/")
            .trim_start_matches('@');

        let packed = self.bot_chat(name).await?;
        Ok(ChannelRef {
            id: packed.id,
            access_hash: packed.access_hash.unwrap_or(0),
            name: name.to_string(),
        })
    }

    async fn is_channel_member(&mut self, channel: &ChannelRef) -> Result<bool> {
        let request = tl::functions::channels::GetParticipant {
            channel: input_channel(channel),
            participant: tl::types::InputPeerSelf {}.into(),
        };
        match self.live()?.invoke(&request).await {
            Ok(_) => Ok(true),
            Err(InvocationError::Rpc(rpc)) if rpc.name == "USER_NOT_PARTICIPANT" => Ok(false),
            Err(e) => Err(rpc_error(e)),
        }
    }

    async fn join_channel(&mut self, channel: &ChannelRef) -> Result<()> {
        let request = tl::functions::channels::JoinChannel {
            channel: input_channel(channel),
        };
        self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(())
    }

    async fn mute_channel(&mut self, channel: &ChannelRef) -> Result<()> {
        let settings = tl::types::InputPeerNotifySettings {
            show_previews: None,
            silent: Some(true),
            mute_until: None,
            sound: Some(tl::types::NotificationSoundNone {}.into()),
            stories_muted: None,
            stories_hide_sender: None,
            stories_sound: None,
        };
        let request = tl::functions::account::UpdateNotifySettings {
            peer: tl::types::InputNotifyPeer {
                peer: input_peer_channel(channel),
            }
            .into(),
            settings: settings.into(),
        };
        self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(())
    }

    async fn move_to_folder(&mut self, channel: &ChannelRef, folder_id: i32) -> Result<()> {
        let request = tl::functions::folders::EditPeerFolders {
            folder_peers: vec![tl::types::InputFolderPeer {
                peer: input_peer_channel(channel),
                folder_id,
            }
            .into()],
        };
        self.live()?.invoke(&request).await.map_err(rpc_error)?;
        Ok(())
    }

    async fn export_desktop(&mut self, dir: &Path) -> Result<()> {
        let client = self.live()?;

        // Snapshot the live session; it carries the auth keys and the
        // signed-in user the desktop format needs.
        let raw = client.session().save();
        let account = desktop_account_from_session(&raw)?;
        tdesktop::save_account(dir, &account)
    }
}

/// Build the native session file for an imported desktop account.
fn write_native_session(path: &Path, account: &DesktopAccount) -> Result<()> {
    let session = Session::new();

    let mut usable = 0;
    for (dc_id, auth_key) in &account.auth_keys {
        let Some((_, addr)) = DC_ADDRESSES.iter().find(|(id, _)| id == dc_id) else {
            tracing::warn!(dc = dc_id, "skipping auth key for unknown datacenter");
            continue;
        };
        session.insert_dc(*dc_id, SocketAddr::from((*addr, DC_PORT)), auth_key);
        usable += 1;
    }

    if usable == 0 {
        return Err(Error::SessionInvalid(
            "desktop session has no usable auth keys".to_string(),
        ));
    }

    session.set_user(account.user_id, account.main_dc_id, false);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    session.save_to_file(path)?;
    Ok(())
}

/// Extract the desktop-format account from a serialized native session.
fn desktop_account_from_session(raw: &[u8]) -> Result<DesktopAccount> {
    let grammers_session::enums::Session::Session(session) =
        grammers_session::enums::Session::from_bytes(raw)
            .map_err(|e| Error::External(format!("cannot parse session snapshot: {e}")))?;

    let user = session
        .user
        .map(|grammers_session::enums::User::User(u)| u)
        .ok_or_else(|| Error::SessionInvalid("session has no signed-in user".to_string()))?;

    let mut auth_keys = Vec::new();
    for dc in session.dcs {
        let grammers_session::enums::DataCenter::DataCenter(dc) = dc;
        if let Some(auth) = dc.auth {
            let key: [u8; 256] = auth.as_slice().try_into().map_err(|_| {
                Error::SessionInvalid("session auth key has the wrong length".to_string())
            })?;
            auth_keys.push((dc.id, key));
        }
    }

    if auth_keys.is_empty() {
        return Err(Error::SessionInvalid(
            "session has no auth keys to export".to_string(),
        ));
    }

    Ok(DesktopAccount {
        user_id: user.id,
        main_dc_id: user.dc,
        auth_keys,
    })
}

/// Desktop client identity for converted sessions, run through the
/// normalizer so both key aliases are populated.
fn desktop_credential(env: &DesktopEnv) -> Result<ApiCredential> {
    credential::normalize(&json!({
        "api_id": DESKTOP_API_ID,
        "api_hash": DESKTOP_API_HASH,
        "device_model": "Desktop",
        "system_version": env.system_version,
        "app_version": env.app_version,
        "lang_code": "en",
        "system_lang_code": "en-US",
        "lang_pack": "tdesktop",
    }))
}

fn input_peer_user(packed: &PackedChat) -> tl::enums::InputPeer {
    tl::types::InputPeerUser {
        user_id: packed.id,
        access_hash: packed.access_hash.unwrap_or(0),
    }
    .into()
}

fn input_user(packed: &PackedChat) -> tl::enums::InputUser {
    tl::types::InputUser {
        user_id: packed.id,
        access_hash: packed.access_hash.unwrap_or(0),
    }
    .into()
}

fn input_channel(channel: &ChannelRef) -> tl::enums::InputChannel {
    tl::types::InputChannel {
        channel_id: channel.id,
        access_hash: channel.access_hash,
    }
    .into()
}

fn input_peer_channel(channel: &ChannelRef) -> tl::enums::InputPeer {
    tl::types::InputPeerChannel {
        channel_id: channel.id,
        access_hash: channel.access_hash,
    }
    .into()
}

/// Map library invocation failures onto the core taxonomy: session
/// errors are client-correctable, transport failures are retryable.
fn rpc_error(e: InvocationError) -> Error {
    match &e {
        InvocationError::Rpc(rpc) if SESSION_ERROR_NAMES.contains(&rpc.name.as_str()) => {
            Error::SessionInvalid(format!("session rejected: {}", rpc.name))
        }
        InvocationError::Rpc(_) => Error::External(format!("rpc error: {e}")),
        _ => Error::Proxy(format!("transport error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_credential_populates_from_env() {
        let cred = desktop_credential(&DesktopEnv {
            system_version: "Windows 11".to_string(),
            app_version: "5.3.1 x64".to_string(),
        })
        .unwrap();
        assert_eq!(cred.api_id, DESKTOP_API_ID);
        assert_eq!(cred.system_version, "Windows 11");
        assert_eq!(cred.lang_pack, "tdesktop");
    }

    #[test]
    fn native_session_round_trips_desktop_account() {
        let mut key = [0u8; 256];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let account = DesktopAccount {
            user_id: 42,
            main_dc_id: 2,
            auth_keys: vec![(2, key)],
        };

        let dir = std::env::temp_dir().join(format!(
            "tma-native-session-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("42.session");

        write_native_session(&path, &account).unwrap();
        let raw = std::fs::read(&path).unwrap();
        let restored = desktop_account_from_session(&raw).unwrap();
        assert_eq!(restored, account);
    }
}
