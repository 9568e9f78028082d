//! sdn-node — the space-data network node binary.
//!
//! Startup sequence:
//!   1. Open the persistent stores (records, peers, auth, audit)
//!   2. First run: mint the setup token and serve only the admin surface
//!      until setup completes; otherwise unlock the identity directly
//!   3. Start the P2P overlay (GossipSub topics + exchange streams)
//!   4. Start the periodic profile publisher and housekeeping tasks
//!   5. Wait for ctrl-c, then cancel every task cooperatively

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sdn_api::{ApiState, SetupOutcome};
use sdn_audit::{AuditDb, AuditLog};
use sdn_auth::{AuthService, AuthStore, SetupService};
use sdn_core::{AuditSeverity, AUDIT_QUEUE_DEPTH};
use sdn_identity::{IdentityService, ProfileFields, ProfilePublisher};
use sdn_p2p::{P2pConfig, P2pNetwork, TopicFabric};
use sdn_peers::{
    AdmissionMode, ConnectionGater, JsonFileStore, PeerRegistry, RateLimiter, RateLimits,
};
use sdn_proto::{EngineConfig, ExchangeEngine};
use sdn_schemas::SchemaRegistry;
use sdn_store::RecordStore;

#[derive(Parser, Debug)]
#[command(
    name = "sdn-node",
    version,
    about = "Space-data network node — schema-validated record exchange over libp2p"
)]
struct Args {
    /// Directory for persistent state (identity, stores, registry).
    #[arg(long, default_value = "~/.sdn/data")]
    data_dir: PathBuf,

    /// Admin HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:7880")]
    api_addr: SocketAddr,

    /// P2P listen address.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/7878")]
    p2p_listen: String,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Strict admission: refuse peers not present in the registry.
    #[arg(long)]
    strict: bool,

    /// Schemas to subscribe to (comma-separated; default: every builtin).
    #[arg(long, value_delimiter = ',')]
    subscribe: Vec<String>,

    /// Node display name for the published profile.
    #[arg(long, default_value = "")]
    display_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SDN_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "info,sdn=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("sdn-node starting");

    // ── Data directory ────────────────────────────────────────────────────────
    let data_dir = resolve_data_dir(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    restrict_dir(&data_dir);

    // ── Persistent stores ─────────────────────────────────────────────────────
    let store = Arc::new(RecordStore::open(data_dir.join("store")).context("opening record store")?);
    let auth_store = Arc::new(AuthStore::open(data_dir.join("auth")).context("opening auth store")?);
    let audit = Arc::new(AuditLog::new(
        AuditDb::open(data_dir.join("audit")).context("opening audit log")?,
        AUDIT_QUEUE_DEPTH,
    ));

    let mode = if args.strict {
        AdmissionMode::Strict
    } else {
        AdmissionMode::NonStrict
    };
    let registry = Arc::new(
        PeerRegistry::open(
            Box::new(JsonFileStore::new(data_dir.join("peers.json"))),
            mode,
        )
        .context("loading peer registry")?,
    );

    let cancel = CancellationToken::new();

    // ── Audit writer ──────────────────────────────────────────────────────────
    {
        let audit = Arc::clone(&audit);
        let cancel = cancel.clone();
        tokio::spawn(async move { audit.run_writer(cancel).await });
    }

    // ── Setup gate / identity unlock ──────────────────────────────────────────
    let setup = Arc::new(SetupService::new(&data_dir));
    let auth = Arc::new(AuthService::new(Arc::clone(&auth_store), Arc::clone(&audit)));
    let (setup_complete_tx, mut setup_complete_rx) = tokio::sync::mpsc::channel::<SetupOutcome>(1);

    let api_state = Arc::new(ApiState {
        setup: Arc::clone(&setup),
        auth: Arc::clone(&auth),
        audit: Arc::clone(&audit),
        identity: RwLock::new(None),
        setup_complete_tx,
        data_dir: data_dir.clone(),
    });

    // The admin surface runs for the whole node lifetime, setup phase included.
    {
        let state = Arc::clone(&api_state);
        let cancel = cancel.clone();
        let addr = args.api_addr;
        tokio::spawn(async move {
            if let Err(e) = sdn_api::serve(addr, state, cancel).await {
                warn!(error = %e, "admin surface stopped");
            }
        });
    }

    let identity: Arc<IdentityService> = if setup.is_complete() {
        let password = identity_password()?;
        let fields = profile_fields_from(&args);
        let data_dir = data_dir.clone();
        let (identity, _) =
            tokio::task::spawn_blocking(move || {
                IdentityService::load_or_create(&data_dir, &password, fields)
            })
            .await?
            .context("unlocking identity")?;
        let identity = Arc::new(identity);
        *api_state.identity.write().expect("identity lock") = Some(Arc::clone(&identity));
        identity
    } else {
        if let Some(token) = setup.mint_token(chrono::Utc::now().timestamp())? {
            // Operator-facing, deliberately on stdout rather than the log.
            println!("setup token: {token}");
            println!("complete setup within 10 minutes: POST /api/setup on {}", args.api_addr);
        }
        audit.append(
            "setup",
            AuditSeverity::Info,
            "setup token minted, waiting for first-run setup",
            Default::default(),
            None,
        );
        info!("setup pending; the node will join the network once setup completes");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                return Ok(());
            }
            outcome = setup_complete_rx.recv() => {
                let _ = outcome.context("setup channel closed")?;
            }
        }
        api_state
            .identity
            .read()
            .expect("identity lock")
            .clone()
            .context("setup completed without an identity")?
    };

    if !args.display_name.is_empty() {
        identity.set_profile_fields(profile_fields_from(&args));
    }

    // ── Core components ───────────────────────────────────────────────────────
    let schemas = Arc::new(SchemaRegistry::builtin());
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&registry), RateLimits::default()));
    let gater = {
        let audit = Arc::clone(&audit);
        Arc::new(
            ConnectionGater::new(Arc::clone(&registry)).with_refusal_hook(Arc::new(
                move |peer, reason| {
                    let mut detail = std::collections::BTreeMap::new();
                    detail.insert("peer".into(), serde_json::Value::String(peer.into()));
                    audit.append(
                        "connection_refused",
                        AuditSeverity::Info,
                        reason,
                        detail,
                        None,
                    );
                },
            )),
        )
    };
    let engine = {
        let audit = Arc::clone(&audit);
        Arc::new(
            ExchangeEngine::new(
                Arc::clone(&schemas),
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&limiter),
                EngineConfig::default(),
            )
            .with_violation_hook(Arc::new(move |peer, kind| {
                let mut detail = std::collections::BTreeMap::new();
                detail.insert("peer".into(), serde_json::Value::String(peer.into()));
                audit.append(
                    "protocol_violations",
                    AuditSeverity::Warning,
                    format!("repeated {kind} violations"),
                    detail,
                    None,
                );
            })),
        )
    };
    let fabric = Arc::new(TopicFabric::new(
        Arc::clone(&schemas),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&limiter),
    ));

    // ── P2P overlay ───────────────────────────────────────────────────────────
    let subscribe_schemas = if args.subscribe.is_empty() {
        schemas.schema_names()
    } else {
        args.subscribe.clone()
    };
    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        protocol_version: "/spacedatanetwork/1.0.0".into(),
        subscribe_schemas,
    };
    let overlay_keypair =
        libp2p::identity::Keypair::ed25519_from_bytes(*identity.keys().overlay_seed())
            .context("building overlay identity")?;
    let (network, handle) = P2pNetwork::new(
        &p2p_config,
        overlay_keypair,
        Arc::clone(&engine),
        Arc::clone(&fabric),
        gater,
        Arc::clone(&registry),
        Arc::clone(&limiter),
    )
    .map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %handle.local_peer_id, "overlay identity");

    {
        let cancel = cancel.clone();
        tokio::spawn(async move { network.run(cancel).await });
    }

    // ── Profile publisher ─────────────────────────────────────────────────────
    {
        let publisher = ProfilePublisher::new(
            Arc::clone(&identity),
            Arc::clone(&store),
            handle.topic_publisher(),
            handle.local_peer_id.to_base58(),
        );
        let cancel = cancel.clone();
        tokio::spawn(async move { publisher.run(cancel).await });
    }

    // ── Session sweeper ───────────────────────────────────────────────────────
    {
        let auth_store = Arc::clone(&auth_store);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match auth_store.sweep_sessions(chrono::Utc::now().timestamp()) {
                            Ok(0) => {}
                            Ok(n) => info!(swept = n, "expired sessions removed"),
                            Err(e) => warn!(error = %e, "session sweep failed"),
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    info!("node ready");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();

    // Give handler tasks a moment to observe cancellation, then flush.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    store.flush().ok();
    auth_store.flush().ok();
    Ok(())
}

/// `SDN_DATA_DIR` overrides the default; an explicit `--data-dir` flag wins
/// over both.
fn resolve_data_dir(arg: &Path) -> PathBuf {
    let default: PathBuf = "~/.sdn/data".into();
    if arg == default.as_path() {
        if let Ok(env_dir) = std::env::var("SDN_DATA_DIR") {
            if !env_dir.trim().is_empty() {
                return expand_tilde(Path::new(&env_dir));
            }
        }
    }
    expand_tilde(arg)
}

/// Identity password: `SDN_IDENTITY_PASSWORD`, or an interactive prompt when
/// attached to a terminal.
fn identity_password() -> anyhow::Result<String> {
    if let Ok(password) = std::env::var("SDN_IDENTITY_PASSWORD") {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    eprint!("identity password: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading identity password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("no identity password provided (set SDN_IDENTITY_PASSWORD)");
    }
    Ok(password)
}

fn profile_fields_from(args: &Args) -> ProfileFields {
    ProfileFields {
        display_name: args.display_name.clone(),
        addresses: vec![args.p2p_listen.clone()],
        ..Default::default()
    }
}

fn restrict_dir(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
