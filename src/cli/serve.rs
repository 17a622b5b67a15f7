use std::{fs, sync::Arc};

use tracing::info;
use ulid::Ulid;

use super::ServeArgs;
use crate::{
    auth::HookAuthenticator,
    config,
    dispatch::{
        HookDispatcher, HookListener, HookRegistry, LogListener, RepositoryRegistry,
        RepositoryScope,
    },
    environment::InvocationEnv,
    errors::Result,
    protocol::HookType,
    server::HookServer,
};

pub async fn execute(args: ServeArgs) -> Result<()> {
    let mut config = config::load()?;
    if let Some(host) = args.bind {
        config.bind_host = host;
    }
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    let authenticator = Arc::new(HookAuthenticator::new());
    let mut registry = HookRegistry::new();
    let log_listener: Arc<dyn HookListener> = Arc::new(LogListener);
    registry.register(
        HookType::PreReceive,
        RepositoryScope::All,
        Arc::clone(&log_listener),
    );
    registry.register(HookType::PostReceive, RepositoryScope::All, log_listener);

    let dispatcher = Arc::new(HookDispatcher::new(
        Arc::new(RepositoryRegistry::new(config.repositories.clone())),
        Arc::new(registry),
    ));

    let server = HookServer::bind(
        (config.bind_host.as_str(), config.bind_port),
        Arc::clone(&authenticator),
        dispatcher,
        config.server_options(),
    )
    .await?;
    let addr = server.local_addr()?;

    let pid_path = config::pid_path()?;
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;

    // One invocation per repository; paste these into the hook script's
    // environment. A consumed challenge needs a restart to re-arm.
    let mut invocations = Vec::new();
    for repository in &config.repositories {
        let environment = authenticator.prepare();
        let invocation = InvocationEnv::new(
            addr.ip().to_string(),
            addr.port(),
            &environment,
            Ulid::new().to_string(),
            repository.id.clone(),
        );
        println!("# {} ({})", repository.name, repository.id);
        for (name, value) in invocation.vars() {
            println!("export {name}={value}");
        }
        invocations.push(environment);
    }
    if config.repositories.is_empty() {
        info!("no repositories configured; every hook event will be rejected as not found");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("hook server received shutdown signal");
        }
        result = server.run() => {
            result?;
        }
    }

    for environment in &invocations {
        authenticator.discard(environment);
    }
    let _ = fs::remove_file(&pid_path);
    Ok(())
}
