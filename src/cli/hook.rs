use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::info;

use super::HookArgs;
use crate::{
    environment::InvocationEnv,
    errors::Result,
    protocol::{self, DEFAULT_MAX_FRAME_BYTES, HookResponse, HookType, ProtocolError, Severity},
};

pub async fn execute(args: HookArgs) -> Result<()> {
    let hook_type: HookType = args.hook_type.parse()?;
    let env = InvocationEnv::from_env()?;

    let response = match call_server(&env, hook_type).await {
        Ok(response) => response,
        Err(err) => {
            // No decision from the server means the operation must not
            // go through.
            eprintln!("hook channel unavailable — aborting for safety ({err})");
            std::process::exit(2);
        }
    };

    for message in &response.messages {
        match message.severity {
            Severity::Note => println!("{}", message.text),
            Severity::Error => eprintln!("{}", message.text),
        }
    }

    if response.abort {
        std::process::exit(1);
    }

    info!(
        hook = %hook_type,
        transaction_id = %env.transaction_id,
        repository_id = %env.repository_id,
        "hook accepted"
    );
    Ok(())
}

async fn call_server(
    env: &InvocationEnv,
    hook_type: HookType,
) -> std::result::Result<HookResponse, ProtocolError> {
    let stream = TcpStream::connect((env.host.as_str(), env.port)).await?;
    let mut framed = Framed::new(stream, protocol::codec(DEFAULT_MAX_FRAME_BYTES));
    protocol::send(&mut framed, &env.to_request(hook_type)).await?;
    protocol::receive(&mut framed).await
}
