use std::path::Path;

use async_trait::async_trait;

use crate::{
    credential::ApiCredential,
    domain::{ChannelRef, SessionDescriptor, UserProfile},
    proxy::ProxyConfig,
    resolver::DesktopEnv,
    Result,
};

/// Outcome of probing whether a conversation with a bot already exists.
///
/// The probe is deliberately fallible-by-design: a failed probe is
/// treated the same as an empty conversation, never as an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotHistory {
    Initialized,
    Empty,
    ProbeFailed,
}

impl BotHistory {
    pub fn needs_handshake(self) -> bool {
        !matches!(self, BotHistory::Initialized)
    }
}

/// Hexagonal port over the wrapped protocol client.
///
/// One instance is exclusively owned by the request that created it and
/// lives at most as long as that request. `disconnect` must run on every
/// exit path; implementations must also tear the transport down on drop,
/// because a timed-out flow is cancelled rather than unwound.
#[async_trait]
pub trait TelegramSession: Send {
    /// Connect and authenticate with the stored session. Never starts a
    /// fresh login flow.
    async fn connect(&mut self) -> Result<()>;

    /// Orderly shutdown. Idempotent: disconnecting an already
    /// disconnected session is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    async fn profile(&mut self) -> Result<UserProfile>;
    async fn update_username(&mut self, username: &str) -> Result<()>;

    async fn send_bot_message(&mut self, bot: &str, text: &str) -> Result<()>;

    /// Whether any message exists in the conversation with `bot`.
    async fn has_bot_history(&mut self, bot: &str) -> Result<bool>;

    /// Menu-button web view against `bot`; returns the browser-loadable
    /// URL carrying the launch payload.
    async fn request_menu_web_view(
        &mut self,
        bot: &str,
        url: &str,
        start_param: Option<&str>,
    ) -> Result<String>;

    /// Named mini-app web view against `bot`; returns the
    /// browser-loadable URL carrying the launch payload.
    async fn request_app_web_view(
        &mut self,
        bot: &str,
        short_name: &str,
        start_param: Option<&str>,
    ) -> Result<String>;

    async fn resolve_channel(&mut self, identifier: &str) -> Result<ChannelRef>;

    /// Membership probe. Callers treat a failure as "not a member".
    async fn is_channel_member(&mut self, channel: &ChannelRef) -> Result<bool>;
    async fn join_channel(&mut self, channel: &ChannelRef) -> Result<()>;
    async fn mute_channel(&mut self, channel: &ChannelRef) -> Result<()>;
    async fn move_to_folder(&mut self, channel: &ChannelRef, folder_id: i32) -> Result<()>;

    /// Convert the live session to desktop format under `dir`.
    async fn export_desktop(&mut self, dir: &Path) -> Result<()>;
}

/// A resolved session: a client ready to connect, plus the credential
/// the connection will be built with. For desktop descriptors that is
/// the credential embedded in the converted session.
pub struct ResolvedSession {
    pub client: Box<dyn TelegramSession>,
    pub credential: ApiCredential,
}

/// Builds clients from session descriptors. Implemented by the adapter
/// crate over the wrapped protocol library.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build a client for the descriptor. Desktop (`tdata`) sessions are
    /// converted to the native format on the way; `env` supplies the
    /// synthesized environment fields used only for that conversion.
    async fn open(
        &self,
        descriptor: &SessionDescriptor,
        proxy: &ProxyConfig,
        env: &DesktopEnv,
    ) -> Result<ResolvedSession>;
}
