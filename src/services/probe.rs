//! Browser probes against provider sign-in pages.

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::map::Map as JsonMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::WorkerConfig;
use crate::models::job::Provider;
use crate::services::classifier::Signal;

/// Submits an address to a provider's sign-in flow and reports what came back.
#[async_trait]
pub trait ProbeDriver: Send + Sync {
    async fn probe(&self, provider: Provider, email: &str) -> Result<Signal, ProbeError>;

    /// Release any browser resources. Called once when the worker stops.
    async fn shutdown(&self) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Failed to start browser session: {0}")]
    Session(#[from] fantoccini::error::NewSessionError),

    #[error("Browser command failed: {0}")]
    Command(#[from] fantoccini::error::CmdError),

    #[error("Probe timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Browser session pool is closed")]
    PoolClosed,
}

/// Where a provider's identifier step lives and how to drive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFlow {
    pub start_url: &'static str,
    pub email_input: &'static str,
    pub submit: &'static str,
}

impl LoginFlow {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Office365 => LoginFlow {
                start_url: "https://login.microsoftonline.com/",
                email_input: "input[type=\"email\"]",
                submit: "input[type=\"submit\"]",
            },
            Provider::Gmail => LoginFlow {
                start_url: "https://accounts.google.com/signin/v2/identifier?service=mail",
                email_input: "input[type=\"email\"]",
                submit: "#identifierNext button, #identifierNext",
            },
        }
    }
}

/// Browser launch settings shared by every session in a pool.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub proxy_server: Option<String>,
}

/// Chrome capabilities for a probe session.
pub fn session_capabilities(settings: &SessionSettings) -> JsonMap<String, serde_json::Value> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--window-size=1280,900".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--mute-audio".to_string(),
        "--lang=en-US".to_string(),
    ];
    if settings.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = settings.proxy_server.as_deref() {
        args.push(format!("--proxy-server={}", proxy));
    }

    let mut chrome_opts = JsonMap::new();
    chrome_opts.insert("args".to_string(), serde_json::json!(args));

    let mut caps = JsonMap::new();
    caps.insert("browserName".to_string(), serde_json::json!("chrome"));
    caps.insert(
        "goog:chromeOptions".to_string(),
        serde_json::json!(chrome_opts),
    );
    caps
}

/// Opens and closes the browser sessions handed out by a [`SessionPool`].
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: Send;

    async fn open(&self) -> Result<Self::Session, ProbeError>;

    async fn close(&self, session: Self::Session);
}

/// Starts Chrome sessions on a shared WebDriver endpoint.
pub struct ChromeLauncher {
    settings: SessionSettings,
}

impl ChromeLauncher {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    type Session = Client;

    async fn open(&self) -> Result<Client, ProbeError> {
        tracing::debug!(webdriver_url = %self.settings.webdriver_url, "Opening browser session");

        let mut builder = ClientBuilder::native();
        builder.capabilities(session_capabilities(&self.settings));

        match builder.connect(&self.settings.webdriver_url).await {
            Ok(client) => Ok(client),
            Err(e) => {
                tracing::error!(
                    webdriver_url = %self.settings.webdriver_url,
                    error = %e,
                    "Failed to connect to WebDriver"
                );
                Err(e.into())
            }
        }
    }

    async fn close(&self, client: Client) {
        if let Err(e) = client.close().await {
            tracing::warn!(error = %e, "Failed to close browser session cleanly");
        }
    }
}

/// A browser session checked out of a [`SessionPool`].
pub struct PooledSession<S> {
    session: S,
    permit: OwnedSemaphorePermit,
}

impl<S> PooledSession<S> {
    pub fn session(&self) -> &S {
        &self.session
    }
}

/// Bounds how many browser sessions are alive at once.
///
/// Every [`acquire`](Self::acquire) opens a new session and
/// [`release`](Self::release) closes it, so cookies and storage never carry
/// over from one probe to the next. Only the launcher's endpoint is shared.
pub struct SessionPool<L: SessionLauncher> {
    launcher: L,
    slots: Arc<Semaphore>,
}

impl<L: SessionLauncher> SessionPool<L> {
    pub fn new(launcher: L, max_sessions: usize) -> Self {
        Self {
            launcher,
            slots: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<PooledSession<L::Session>, ProbeError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::PoolClosed)?;

        let session = self.launcher.open().await?;
        Ok(PooledSession { session, permit })
    }

    /// Close the session, then free its slot.
    pub async fn release(&self, pooled: PooledSession<L::Session>) {
        let PooledSession { session, permit } = pooled;
        self.launcher.close(session).await;
        drop(permit);
    }

    /// Refuse new checkouts. Sessions already out are closed on release.
    pub fn shutdown(&self) {
        self.slots.close();
        tracing::info!("Browser session pool closed");
    }
}

/// [`ProbeDriver`] that runs each probe in its own WebDriver session.
pub struct WebDriverProbe {
    pool: SessionPool<ChromeLauncher>,
    probe_timeout: Duration,
    settle_delay: Duration,
}

impl WebDriverProbe {
    pub fn new(config: &WorkerConfig) -> Self {
        let settings = SessionSettings {
            webdriver_url: config.webdriver_url.clone(),
            headless: config.headless,
            proxy_server: config.proxy_server.clone(),
        };

        Self {
            pool: SessionPool::new(ChromeLauncher::new(settings), config.concurrent_jobs),
            probe_timeout: config.probe_timeout(),
            settle_delay: config.settle_delay(),
        }
    }
}

#[async_trait]
impl ProbeDriver for WebDriverProbe {
    async fn probe(&self, provider: Provider, email: &str) -> Result<Signal, ProbeError> {
        let session = self.pool.acquire().await?;
        let budget = self.probe_timeout + self.settle_delay;

        let flow = run_login_flow(
            session.session(),
            LoginFlow::for_provider(provider),
            email,
            self.probe_timeout,
            self.settle_delay,
        );
        let outcome = tokio::time::timeout(budget, flow).await;

        self.pool.release(session).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(budget)),
        }
    }

    async fn shutdown(&self) {
        self.pool.shutdown();
    }
}

async fn run_login_flow(
    client: &Client,
    flow: LoginFlow,
    email: &str,
    wait_timeout: Duration,
    settle_delay: Duration,
) -> Result<Signal, ProbeError> {
    client.goto(flow.start_url).await?;

    let input = client
        .wait()
        .at_most(wait_timeout)
        .for_element(Locator::Css(flow.email_input))
        .await?;
    input.send_keys(email).await?;

    let submit = client
        .wait()
        .at_most(wait_timeout)
        .for_element(Locator::Css(flow.submit))
        .await?;
    submit.click().await?;

    // Give the provider time to render its verdict.
    tokio::time::sleep(settle_delay).await;

    let page_source = client.source().await?;
    let current_url = client.current_url().await?.to_string();

    Ok(Signal {
        page_source,
        current_url,
    })
}
