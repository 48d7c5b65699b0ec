//! Placement simulator
//!
//! Opens a PDF in the in-memory engine, drops widgets at the given pointer
//! positions, optionally signs a field through the configured signing
//! service and prints the resulting session as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use placement_core::config::PlacementConfig;
use placement_core::engine::memory::InMemoryEngine;
use placement_core::registry::RosterPolicy;
use placement_core::{
    DragPayload, DropEvent, LoadOptions, MemorySessionStorage, PlacementStore, Reconciler,
    SessionSnapshot, SigneeRegistry, SigningOrchestrator,
};
use shared_types::{DocumentKey, FieldName, PlacementType, Role};
use signing_client::HttpSigningService;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "placement-sim")]
#[command(version, about = "Place signature fields on a PDF and print the session")]
struct Args {
    /// PDF to open
    pdf: PathBuf,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pages in the simulated viewer
    #[arg(long, default_value = "1")]
    pages: usize,

    /// Session JSON to restore before opening
    #[arg(long)]
    session: Option<PathBuf>,

    /// Add a signer, as "Name <email>"
    #[arg(long = "signee", value_parser = parse_signee)]
    signees: Vec<(String, String)>,

    /// Email of the signee to make active before dropping
    #[arg(long = "as")]
    active: Option<String>,

    /// Drop a widget at x,y[,page[,type]]
    #[arg(long = "drop", value_parser = parse_drop)]
    drops: Vec<DropSpec>,

    /// Sign this field through the configured signing service
    #[arg(long)]
    sign: Option<String>,

    /// Where to write the signed PDF
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
struct DropSpec {
    x: f64,
    y: f64,
    page: u32,
    placement_type: PlacementType,
}

fn parse_drop(raw: &str) -> Result<DropSpec, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() < 2 || parts.len() > 4 {
        return Err(format!("expected x,y[,page[,type]], got {:?}", raw));
    }
    let number = |s: &str| s.parse::<f64>().map_err(|e| format!("{}: {}", s, e));
    let page = match parts.get(2) {
        Some(p) => p.parse::<u32>().map_err(|e| format!("{}: {}", p, e))?,
        None => 0,
    };
    let placement_type = match parts.get(3) {
        Some(t) => PlacementType::parse(t).ok_or_else(|| format!("unknown type {:?}", t))?,
        None => PlacementType::Signature,
    };
    Ok(DropSpec {
        x: number(parts[0])?,
        y: number(parts[1])?,
        page,
        placement_type,
    })
}

fn parse_signee(raw: &str) -> Result<(String, String), String> {
    let (name, rest) = raw
        .split_once('<')
        .ok_or_else(|| format!("expected \"Name <email>\", got {:?}", raw))?;
    let email = rest
        .strip_suffix('>')
        .ok_or_else(|| format!("missing closing '>' in {:?}", raw))?;
    let (name, email) = (name.trim(), email.trim());
    if name.is_empty() || !email.contains('@') {
        return Err(format!("expected \"Name <email>\", got {:?}", raw));
    }
    Ok((name.to_string(), email.to_string()))
}

fn load_config(path: Option<&PathBuf>) -> Result<PlacementConfig> {
    let mut config = match path {
        Some(path) => PlacementConfig::from_file(path)?,
        None => PlacementConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // stdout carries the session JSON
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("placement_core=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(args.config.as_ref())?;

    let storage = Rc::new(MemorySessionStorage::new());
    let store = Rc::new(PlacementStore::open(storage.clone())?);
    let registry = Rc::new(SigneeRegistry::new(
        storage,
        &config.palette,
        RosterPolicy {
            single_editor: config.roster.single_editor,
        },
    ));

    if let Some(path) = &args.session {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading session {}", path.display()))?;
        SessionSnapshot::from_json(&raw)?.restore(&store, &registry)?;
    }
    registry.restore(&config.roster)?;
    for (name, email) in &args.signees {
        registry.add(name, email)?;
    }
    if registry.signees().is_empty() {
        registry.add_with_role("Editor", "editor@localhost", Role::Editor)?;
    }
    if let Some(email) = &args.active {
        let Some(signee) = registry.signees().into_iter().find(|s| &s.email == email) else {
            bail!("no signee with email {}", email);
        };
        registry.set_active(signee.id)?;
    }

    let engine = Rc::new(InMemoryEngine::new(args.pages));
    let reconciler = Rc::new(Reconciler::new(
        engine,
        store.clone(),
        registry.clone(),
        config.footprints.clone(),
        LoadOptions {
            container: config.viewer.container.clone(),
            base_url: config.viewer.base_url.clone(),
        },
    ));

    let bytes = std::fs::read(&args.pdf)
        .with_context(|| format!("reading {}", args.pdf.display()))?;
    let file_name = args
        .pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    let key = DocumentKey::for_upload(&file_name, &bytes);

    let report = reconciler.open(key.clone(), bytes).await?;
    info!(document = %key, replayed = report.created, "opened");

    for spec in &args.drops {
        let payload = DragPayload::capture(&registry, spec.placement_type)?;
        let placement = reconciler
            .handle_drop(DropEvent {
                client_x: spec.x,
                client_y: spec.y,
                page_index: spec.page,
                payload: payload.encode(),
            })
            .await?;
        info!(field = %placement.field_name, signee = %placement.signee_id, "dropped");
    }

    if let Some(field) = &args.sign {
        let service = Rc::new(HttpSigningService::from_settings(&config.signing)?);
        let watermark = match &config.signing.watermark_path {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("reading watermark {}", path.display()))?,
            None => Vec::new(),
        };
        let orchestrator = SigningOrchestrator::new(
            reconciler.clone(),
            store.clone(),
            registry.clone(),
            service,
            config.signing.clone(),
            watermark,
        );
        let signed = match orchestrator.sign(&key, &FieldName::new(field.as_str())).await {
            Ok(signed) => signed,
            // Signed but not shown; the bytes are still the signed output
            Err(e) => match e.signed_document() {
                Some(document) => {
                    warn!(error = %e, "signed document not loaded");
                    document.to_vec()
                }
                None => return Err(e.into()),
            },
        };
        if let Some(output) = &args.output {
            std::fs::write(output, &signed)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(path = %output.display(), "signed document written");
        }
    }

    let snapshot = SessionSnapshot::capture(&store, &registry);
    println!("{}", snapshot.to_json()?);

    reconciler.close();
    Ok(())
}
