//! Minimal host binary: acquires the lens engine module, opens a preview
//! session, lists the available lenses, applies the first one, and shuts
//! down cleanly. Stands in for a real presentation layer.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lenshost_core::{LensQuery, ModuleId};
use lenshost_module::{
    CatalogInstaller, CatalogSource, EngineSandboxConfig, PluginLoader, TrustPolicy,
};
use lenshost_session::{AttachTarget, Controller, Notice, SessionOrchestrator};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let catalog_location = env_or("LENSHOST_CATALOG", "./catalog");
    let module_dir = env_or("LENSHOST_MODULE_DIR", "./modules");
    let cache_dir = env_or("LENSHOST_CACHE_DIR", "./cache");
    let module_name = env_or("LENSHOST_MODULE", "lens-engine");
    let surface = env_or("LENSHOST_SURFACE", "primary");
    let media_source = std::env::var("LENSHOST_MEDIA").ok().map(PathBuf::from);

    let module = ModuleId::new(&module_name).expect("invalid LENSHOST_MODULE");
    let catalog = CatalogSource::parse(&catalog_location).expect("invalid LENSHOST_CATALOG");
    tracing::info!(module = %module, catalog = %catalog.describe(), "starting lenshost");

    let installer = CatalogInstaller::new(catalog, &module_dir);
    let loader = PluginLoader::new(
        &module_dir,
        TrustPolicy::from_env(),
        EngineSandboxConfig::from_env(),
    );

    let (controller, mut notices) =
        Controller::spawn(module, Arc::new(installer), Arc::new(loader));
    controller.start();

    // Drive one start-to-ready cycle off the notice stream
    let handle = loop {
        match notices.recv().await {
            Some(Notice::Checking) => println!("checking module availability..."),
            Some(Notice::Installing(percent)) => println!("installing module: {percent}%"),
            Some(Notice::Ready(handle)) => break handle,
            Some(Notice::Failed(reason)) => {
                eprintln!("module unavailable: {reason}");
                std::process::exit(1);
            }
            None => {
                eprintln!("controller stopped unexpectedly");
                std::process::exit(1);
            }
        }
    };
    println!(
        "module ready: {} v{} ({})",
        handle.module(),
        handle.version(),
        &handle.fingerprint()[..12]
    );

    let orchestrator = SessionOrchestrator::new(&cache_dir);
    let session = orchestrator
        .start(&handle, AttachTarget { surface }, media_source.as_deref())
        .await
        .expect("failed to open session");

    let result = session
        .query_lenses(&LensQuery::default())
        .await
        .expect("lens query failed");
    match result.lenses() {
        Some(lenses) => {
            println!("available lenses:");
            for lens in lenses {
                println!("  {} - {}", lens.id, lens.name);
            }
            if let Some(first) = lenses.first() {
                let applied = session.apply(first).await.expect("lens apply failed");
                println!(
                    "applied '{}': {}",
                    first.name,
                    if applied { "ok" } else { "rejected" }
                );
            }
        }
        None => println!("no lenses available"),
    }

    orchestrator.release().await.expect("session release failed");
    println!("session released");
}
