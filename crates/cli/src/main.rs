use anyhow::Context;
use clap::{Parser, Subcommand};
use lib::config::ClientConfig;
use lib::gateway::protocol::{Jsep, Message};
use lib::{Gateway, GatewayOptions, Handle, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const KEEPALIVE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "janus")]
#[command(about = "Janus gateway CLI", long_about = None)]
struct Cli {
    /// Config file path (default: JANUS_CONFIG_PATH or ~/.janus/config.json)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect to the gateway and print its server info as JSON.
    Info {
        /// Gateway WebSocket URL (default from JANUS_GATEWAY_URL or config)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Join a VideoRoom as publisher and print handle events until Ctrl+C.
    Join {
        /// Room number
        #[arg(long)]
        room: u64,

        /// Display name shown to other participants
        #[arg(long, value_name = "NAME")]
        display: Option<String>,

        /// Plugin to attach to
        #[arg(long, value_name = "NAME", default_value = "janus.plugin.videoroom")]
        plugin: String,

        /// SDP offer to publish after joining; the answer is printed.
        #[arg(long, value_name = "PATH")]
        offer_file: Option<PathBuf>,

        /// Gateway WebSocket URL (default from JANUS_GATEWAY_URL or config)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("janus {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Info { url }) => {
            if let Err(e) = run_info(cli.config, url).await {
                log::error!("info failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Join {
            room,
            display,
            plugin,
            offer_file,
            url,
        }) => {
            let args = JoinArgs {
                room,
                display,
                plugin,
                offer_file,
            };
            if let Err(e) = run_join(cli.config, url, args).await {
                log::error!("join failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

struct JoinArgs {
    room: u64,
    display: Option<String>,
    plugin: String,
    offer_file: Option<PathBuf>,
}

/// Load config and connect; `--url` beats JANUS_GATEWAY_URL beats the config file.
async fn connect(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<Gateway> {
    let (config, path): (ClientConfig, PathBuf) = lib::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    let url = url.unwrap_or_else(|| lib::config::resolve_gateway_url(&config));
    let options = GatewayOptions::from_config(&config.gateway);
    Gateway::connect_with(&url, options)
        .await
        .with_context(|| format!("connecting to {}", url))
}

async fn run_info(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<()> {
    let gateway = connect(config_path, url).await?;
    let info = gateway.info().await.context("info request")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    let _ = gateway.close().await;
    Ok(())
}

async fn run_join(
    config_path: Option<PathBuf>,
    url: Option<String>,
    args: JoinArgs,
) -> anyhow::Result<()> {
    let offer = match &args.offer_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading offer from {}", path.display()))?,
        ),
        None => None,
    };

    let gateway = connect(config_path, url).await?;
    let session = gateway.create_session().await.context("create session")?;
    let keepalive = tokio::spawn(keep_session_alive(Arc::clone(&session)));

    let result = join_and_watch(&session, &args, offer).await;

    keepalive.abort();
    if let Err(e) = session.destroy().await {
        log::warn!("destroy session {} failed: {}", session.id(), e);
    }
    let _ = gateway.close().await;
    result
}

async fn join_and_watch(
    session: &Arc<Session>,
    args: &JoinArgs,
    offer: Option<String>,
) -> anyhow::Result<()> {
    let handle = session
        .attach(&args.plugin)
        .await
        .with_context(|| format!("attach {}", args.plugin))?;
    let mut events = handle
        .take_events()
        .context("handle event queue already taken")?;

    let mut join = serde_json::json!({
        "request": "join",
        "ptype": "publisher",
        "room": args.room,
    });
    if let Some(display) = &args.display {
        join["display"] = serde_json::Value::String(display.clone());
    }
    let joined = handle.message(join, None).await.context("join room")?;
    println!(
        "joined room {} as feed {}",
        args.room,
        joined.plugindata.data.get("id").cloned().unwrap_or_default()
    );

    if let Some(sdp) = offer {
        let mut jsep = Jsep::offer(sdp);
        jsep.trickle = Some(false);
        let publish = serde_json::json!({ "request": "publish", "audio": true, "video": true });
        let published = handle
            .message(publish, Some(jsep))
            .await
            .context("publish offer")?;
        match published.jsep {
            Some(answer) => println!("{}", answer.sdp),
            None => log::warn!("publish reply carried no SDP answer"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => println!("{}", describe(&handle, &event)),
                None => break,
            },
        }
    }

    detach(&handle).await;
    Ok(())
}

async fn detach(handle: &Handle) {
    if let Err(e) = handle.detach().await {
        log::warn!("detach handle {} failed: {}", handle.id(), e);
    }
}

async fn keep_session_alive(session: Arc<Session>) {
    loop {
        tokio::time::sleep(KEEPALIVE_PERIOD).await;
        if let Err(e) = session.keep_alive().await {
            log::warn!("keepalive for session {} failed: {}", session.id(), e);
        }
    }
}

fn describe(handle: &Handle, event: &Message) -> String {
    match event {
        Message::Event(e) => format!(
            "[{}] event {}",
            handle.id(),
            serde_json::Value::Object(e.plugindata.data.clone())
        ),
        Message::WebrtcUp(_) => format!("[{}] webrtcup", handle.id()),
        Message::Media(m) => format!(
            "[{}] media {} receiving={}",
            handle.id(),
            m.kind,
            m.receiving
        ),
        Message::SlowLink(s) => format!(
            "[{}] slowlink uplink={} lost={}",
            handle.id(),
            s.uplink,
            s.lost
        ),
        Message::Hangup(h) => format!("[{}] hangup: {}", handle.id(), h.reason),
        other => format!("[{}] {}", handle.id(), other.kind()),
    }
}
