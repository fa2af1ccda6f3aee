use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::{
    credential::ApiCredential,
    domain::{LaunchPayload, SessionDescriptor, SessionKind, UserProfile},
    errors::Error,
    identity::ensure_username,
    journal::ErrorJournal,
    ports::{Connector, ResolvedSession, TelegramSession},
    providers::fetch_launch_payload,
    proxy::ProxyConfig,
    resolver::sample_desktop_env,
    Result,
};

/// Folder index the desktop clients use for the archive.
const ARCHIVE_FOLDER: i32 = 1;

/// Inputs for the fetch-launch-data flow.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    pub descriptor: SessionDescriptor,
    pub proxy: ProxyConfig,
    pub service: String,
    pub referral_code: Option<String>,
}

/// Result of the fetch-launch-data flow, as needed by the HTTP layer.
#[derive(Clone, Debug)]
pub struct LaunchOutcome {
    pub payload: LaunchPayload,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub credential: ApiCredential,
}

#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub descriptor: SessionDescriptor,
    pub proxy: ProxyConfig,
    pub channels: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub descriptor: SessionDescriptor,
    pub proxy: ProxyConfig,
}

/// Orchestrates the three exposed operations over the session ports.
///
/// Every flow follows resolve → connect → act → disconnect, with the
/// disconnect guaranteed on each exit path. Each request owns its own
/// client; nothing here is shared across requests except the connector,
/// the journal and the master RNG.
pub struct Flows {
    connector: Arc<dyn Connector>,
    journal: ErrorJournal,
    fetch_timeout: Duration,
    rng: Mutex<StdRng>,
}

impl Flows {
    pub fn new(connector: Arc<dyn Connector>, journal: ErrorJournal, fetch_timeout: Duration) -> Self {
        Self::with_rng(connector, journal, fetch_timeout, StdRng::from_entropy())
    }

    /// Construct with a pinned randomness source (used by tests).
    pub fn with_rng(
        connector: Arc<dyn Connector>,
        journal: ErrorJournal,
        fetch_timeout: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            connector,
            journal,
            fetch_timeout,
            rng: Mutex::new(rng),
        }
    }

    /// Derive an owned per-request RNG from the master source so flow
    /// bodies never hold the shared lock across awaits.
    async fn request_rng(&self) -> StdRng {
        let mut master = self.rng.lock().await;
        StdRng::seed_from_u64(master.gen())
    }

    /// Fetch launch data end-to-end, bounded by the configured
    /// wall-clock timeout.
    pub async fn fetch_launch_data(&self, req: LaunchRequest) -> Result<LaunchOutcome> {
        let mut rng = self.request_rng().await;
        match timeout(self.fetch_timeout, self.fetch_attempt(req, &mut rng)).await {
            Ok(outcome) => outcome,
            // Cancellation dropped the in-flight client; the session
            // contract tears the transport down on drop.
            Err(_) => Err(Error::Proxy(format!(
                "launch-data flow exceeded {}s",
                self.fetch_timeout.as_secs()
            ))),
        }
    }

    async fn fetch_attempt(&self, req: LaunchRequest, rng: &mut StdRng) -> Result<LaunchOutcome> {
        let env = sample_desktop_env(rng);
        let was_native = req.descriptor.kind == SessionKind::Native;

        let ResolvedSession {
            mut client,
            credential,
        } = self.connector.open(&req.descriptor, &req.proxy, &env).await?;

        let body = Self::fetch_body(client.as_mut(), &req, was_native, rng).await;
        let (payload, profile) = self.release(client.as_mut(), body).await?;

        Ok(LaunchOutcome {
            payload,
            phone: profile.phone,
            username: profile.username,
            credential,
        })
    }

    async fn fetch_body(
        client: &mut dyn TelegramSession,
        req: &LaunchRequest,
        was_native: bool,
        rng: &mut StdRng,
    ) -> Result<(LaunchPayload, UserProfile)> {
        client.connect().await?;

        // Re-export to desktop format only for sessions that arrived in
        // the native format. Flagged in the design notes as possibly
        // incomplete parity with the other flows; kept as specified.
        if req.descriptor.is_upload && was_native {
            client.export_desktop(&req.descriptor.desktop_path()).await?;
        }

        let profile = ensure_username(client, rng).await?;
        let payload =
            fetch_launch_payload(client, &req.service, req.referral_code.as_deref()).await?;

        Ok((payload, profile))
    }

    /// Join each requested channel the account is not already in, then
    /// mute it and file it into the archive folder.
    pub async fn join_channels(&self, req: JoinRequest) -> Result<()> {
        let mut rng = self.request_rng().await;
        let env = sample_desktop_env(&mut rng);

        let ResolvedSession { mut client, .. } =
            self.connector.open(&req.descriptor, &req.proxy, &env).await?;

        let body = Self::join_body(client.as_mut(), &req.channels, &mut rng).await;
        self.release(client.as_mut(), body).await
    }

    async fn join_body(
        client: &mut dyn TelegramSession,
        channels: &[String],
        rng: &mut StdRng,
    ) -> Result<()> {
        client.connect().await?;
        ensure_username(client, rng).await?;

        for identifier in channels {
            let channel = client.resolve_channel(identifier).await?;

            // Non-membership signals via probe failure; never propagate.
            let already_member = client.is_channel_member(&channel).await.unwrap_or(false);
            if already_member {
                continue;
            }

            client.join_channel(&channel).await?;
            client.mute_channel(&channel).await?;
            client.move_to_folder(&channel, ARCHIVE_FOLDER).await?;
        }

        Ok(())
    }

    /// Convert the live session to desktop format and persist it into
    /// the descriptor's directory. No identity-ensuring step.
    pub async fn export_session(&self, req: ExportRequest) -> Result<()> {
        let mut rng = self.request_rng().await;
        let env = sample_desktop_env(&mut rng);

        let ResolvedSession { mut client, .. } =
            self.connector.open(&req.descriptor, &req.proxy, &env).await?;

        let body = Self::export_body(client.as_mut(), &req).await;
        self.release(client.as_mut(), body).await
    }

    async fn export_body(client: &mut dyn TelegramSession, req: &ExportRequest) -> Result<()> {
        client.connect().await?;
        client.export_desktop(&req.descriptor.path_directory).await
    }

    /// Disconnect on every exit path. A cleanup failure after a
    /// successful body is surfaced; after a failed body it is journaled
    /// so it cannot mask the original error.
    async fn release<T>(&self, client: &mut dyn TelegramSession, outcome: Result<T>) -> Result<T> {
        let cleanup = client.disconnect().await;
        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(original), Ok(())) => Err(original),
            (Err(original), Err(cleanup_err)) => {
                self.journal.record("disconnect", &cleanup_err);
                Err(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;

    use crate::domain::{ChannelRef, UserProfile};
    use crate::ports::BotHistory;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeBehavior {
        fail_connect_with_proxy_error: bool,
        hang_on_connect: bool,
        fail_disconnect: bool,
        member_of: HashSet<String>,
        username: Option<String>,
    }

    #[derive(Clone, Default)]
    struct Shared {
        log: Arc<StdMutex<Vec<String>>>,
        disconnects: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Shared {
        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    struct FakeSession {
        behavior: FakeBehavior,
        shared: Shared,
        username: Option<String>,
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.shared.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TelegramSession for FakeSession {
        async fn connect(&mut self) -> Result<()> {
            self.shared.push("connect".to_string());
            if self.behavior.hang_on_connect {
                // Simulates a proxy that never answers.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.behavior.fail_connect_with_proxy_error {
                return Err(Error::Proxy("connection refused".to_string()));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.shared.push("disconnect".to_string());
            self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
            if self.behavior.fail_disconnect {
                return Err(Error::External("teardown failed".to_string()));
            }
            Ok(())
        }

        async fn profile(&mut self) -> Result<UserProfile> {
            Ok(UserProfile {
                id: 99,
                phone: Some("79991234567".to_string()),
                username: self.username.clone(),
                first_name: Some("Jean".to_string()),
                last_name: Some("Dupont".to_string()),
            })
        }

        async fn update_username(&mut self, username: &str) -> Result<()> {
            self.shared.push(format!("update_username:{username}"));
            self.username = Some(username.to_string());
            Ok(())
        }

        async fn send_bot_message(&mut self, bot: &str, text: &str) -> Result<()> {
            self.shared.push(format!("send:{bot}:{text}"));
            Ok(())
        }

        async fn has_bot_history(&mut self, _bot: &str) -> Result<bool> {
            Ok(true)
        }

        async fn request_menu_web_view(
            &mut self,
            _bot: &str,
            _url: &str,
            _start_param: Option<&str>,
        ) -> Result<String> {
            Ok("https://example.com/#tgWebAppData=abc&tgWebAppVersion=7.8".to_string())
        }

        async fn request_app_web_view(
            &mut self,
            _bot: &str,
            _short_name: &str,
            _start_param: Option<&str>,
        ) -> Result<String> {
            Ok("https://example.com/#tgWebAppData=abc&tgWebAppVersion=7.8".to_string())
        }

        async fn resolve_channel(&mut self, identifier: &str) -> Result<ChannelRef> {
            self.shared.push(format!("resolve:{identifier}"));
            Ok(ChannelRef {
                id: identifier.len() as i64,
                access_hash: 7,
                name: identifier.to_string(),
            })
        }

        async fn is_channel_member(&mut self, channel: &ChannelRef) -> Result<bool> {
            self.shared.push(format!("member?:{}", channel.name));
            if self.behavior.member_of.contains(&channel.name) {
                Ok(true)
            } else {
                // Non-membership is signalled via failure upstream.
                Err(Error::External("not a participant".to_string()))
            }
        }

        async fn join_channel(&mut self, channel: &ChannelRef) -> Result<()> {
            self.shared.push(format!("join:{}", channel.name));
            Ok(())
        }

        async fn mute_channel(&mut self, channel: &ChannelRef) -> Result<()> {
            self.shared.push(format!("mute:{}", channel.name));
            Ok(())
        }

        async fn move_to_folder(&mut self, channel: &ChannelRef, folder_id: i32) -> Result<()> {
            self.shared.push(format!("folder:{}:{folder_id}", channel.name));
            Ok(())
        }

        async fn export_desktop(&mut self, dir: &Path) -> Result<()> {
            self.shared.push(format!("export:{}", dir.display()));
            Ok(())
        }
    }

    struct FakeConnector {
        behavior: FakeBehavior,
        shared: Shared,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(
            &self,
            _descriptor: &SessionDescriptor,
            _proxy: &ProxyConfig,
            env: &crate::resolver::DesktopEnv,
        ) -> Result<ResolvedSession> {
            self.shared.push(format!("open:{}", env.system_version));
            Ok(ResolvedSession {
                client: Box::new(FakeSession {
                    username: self.behavior.username.clone(),
                    behavior: self.behavior.clone(),
                    shared: self.shared.clone(),
                }),
                credential: test_credential(),
            })
        }
    }

    fn test_credential() -> ApiCredential {
        ApiCredential {
            api_id: 2040,
            api_hash: "hash".to_string(),
            device_model: "Desktop".to_string(),
            system_version: "Windows 10".to_string(),
            app_version: "5.3.1 x64".to_string(),
            lang_code: "en".to_string(),
            system_lang_code: "en-US".to_string(),
            lang_pack: "tdesktop".to_string(),
        }
    }

    fn descriptor(kind: SessionKind, is_upload: bool) -> SessionDescriptor {
        SessionDescriptor {
            id: "12345".to_string(),
            path_directory: PathBuf::from("/tmp/sessions"),
            kind,
            credential: Some(test_credential()),
            is_upload,
        }
    }

    fn proxy() -> ProxyConfig {
        "socks5:127.0.0.1:1080:u:p".parse().unwrap()
    }

    fn journal(prefix: &str) -> ErrorJournal {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        ErrorJournal::new(format!("/tmp/{prefix}-{}-{ts}.log", std::process::id()))
    }

    fn make_flows(behavior: FakeBehavior, timeout: Duration) -> (Flows, Shared) {
        let shared = Shared::default();
        let connector = Arc::new(FakeConnector {
            behavior,
            shared: shared.clone(),
        });
        let flows = Flows::with_rng(
            connector,
            journal("tma-flows-test"),
            timeout,
            StdRng::seed_from_u64(9),
        );
        (flows, shared)
    }

    fn launch_request(service: &str, kind: SessionKind, is_upload: bool) -> LaunchRequest {
        LaunchRequest {
            descriptor: descriptor(kind, is_upload),
            proxy: proxy(),
            service: service.to_string(),
            referral_code: None,
        }
    }

    #[tokio::test]
    async fn fetch_happy_path_disconnects_once() {
        let (flows, shared) = make_flows(
            FakeBehavior {
                username: Some("existing".to_string()),
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        let out = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap();

        assert_eq!(out.payload.tg_web_app_data.as_deref(), Some("abc"));
        assert_eq!(out.username.as_deref(), Some("existing"));
        assert_eq!(out.phone.as_deref(), Some("79991234567"));
        assert_eq!(shared.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_unknown_service_is_success_with_empty_payload() {
        let (flows, _) = make_flows(
            FakeBehavior {
                username: Some("u".to_string()),
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        let out = flows
            .fetch_launch_data(launch_request("nope", SessionKind::Native, false))
            .await
            .unwrap();
        assert_eq!(out.payload, LaunchPayload::none());
    }

    #[tokio::test]
    async fn fetch_assigns_username_when_missing() {
        let (flows, shared) = make_flows(FakeBehavior::default(), Duration::from_secs(5));

        let out = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap();

        let assigned = out.username.expect("username assigned");
        assert!(assigned.starts_with("jean_dupont"));
        assert!(shared
            .calls()
            .iter()
            .any(|c| c.starts_with("update_username:jean_dupont")));
    }

    #[tokio::test]
    async fn fetch_connect_failure_still_disconnects() {
        let (flows, shared) = make_flows(
            FakeBehavior {
                fail_connect_with_proxy_error: true,
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        let err = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Proxy(_)));
        assert_eq!(shared.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_timeout_maps_to_proxy_error_and_releases_client() {
        let (flows, shared) = make_flows(
            FakeBehavior {
                hang_on_connect: true,
                ..FakeBehavior::default()
            },
            Duration::from_millis(50),
        );

        let err = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Proxy(_)));
        assert!(shared.dropped.load(Ordering::SeqCst), "client must be released");
    }

    #[tokio::test]
    async fn upload_exports_only_native_sessions() {
        let (flows, shared) = make_flows(
            FakeBehavior {
                username: Some("u".to_string()),
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, true))
            .await
            .unwrap();
        assert!(shared
            .calls()
            .contains(&"export:/tmp/sessions/12345".to_string()));

        let (flows, shared) = make_flows(
            FakeBehavior {
                username: Some("u".to_string()),
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );
        flows
            .fetch_launch_data(launch_request("blum", SessionKind::Tdata, true))
            .await
            .unwrap();
        assert!(!shared.calls().iter().any(|c| c.starts_with("export:")));
    }

    #[tokio::test]
    async fn join_skips_channels_the_account_is_in() {
        let mut member_of = HashSet::new();
        member_of.insert("alpha".to_string());
        let (flows, shared) = make_flows(
            FakeBehavior {
                member_of,
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        flows
            .join_channels(JoinRequest {
                descriptor: descriptor(SessionKind::Native, false),
                proxy: proxy(),
                channels: vec!["alpha".to_string(), "beta".to_string()],
            })
            .await
            .unwrap();

        let calls = shared.calls();
        assert!(calls.contains(&"member?:alpha".to_string()));
        assert!(!calls.contains(&"join:alpha".to_string()));
        assert_eq!(
            calls
                .iter()
                .filter(|c| c.starts_with("join:") || c.starts_with("mute:") || c.starts_with("folder:"))
                .collect::<Vec<_>>(),
            vec!["join:beta", "mute:beta", "folder:beta:1"]
        );
        assert_eq!(shared.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn export_never_touches_identity() {
        let (flows, shared) = make_flows(FakeBehavior::default(), Duration::from_secs(5));

        flows
            .export_session(ExportRequest {
                descriptor: descriptor(SessionKind::Native, false),
                proxy: proxy(),
            })
            .await
            .unwrap();

        let calls = shared.calls();
        assert!(calls.contains(&"export:/tmp/sessions".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("update_username:")));
        assert_eq!(shared.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_after_success_is_surfaced() {
        let (flows, _) = make_flows(
            FakeBehavior {
                username: Some("u".to_string()),
                fail_disconnect: true,
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        let err = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }

    #[tokio::test]
    async fn cleanup_failure_never_masks_the_original_error() {
        let (flows, _) = make_flows(
            FakeBehavior {
                fail_connect_with_proxy_error: true,
                fail_disconnect: true,
                ..FakeBehavior::default()
            },
            Duration::from_secs(5),
        );

        let err = flows
            .fetch_launch_data(launch_request("blum", SessionKind::Native, false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Proxy(_)), "original error must win");
    }

}
