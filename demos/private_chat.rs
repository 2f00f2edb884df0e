use std::error::Error;

use fishpi_sdk::chat::{ChatEvent, ChatEventKind};
use fishpi_sdk::{ClientConfig, FishPi};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fishpi_sdk=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let api_key = "REPLACE_WITH_API_KEY".to_string();
    let peer = "REPLACE_WITH_USER_NAME";

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = FishPi::new(ClientConfig::default().with_token(SecretString::new(api_key)))?;
        let channel = client.chat().channel(peer);

        for message in channel.get(1, 20, true).await?.iter().rev() {
            println!("[history] {}: {}", message.sender_user_name, message.markdown);
        }

        channel.on(ChatEventKind::Data, |event: &ChatEvent| {
            if let ChatEvent::Data(message) = event {
                println!("{}: {}", message.sender_user_name, message.markdown);
            }
        });
        channel.on(ChatEventKind::Revoke, |event: &ChatEvent| {
            if let ChatEvent::Revoke(oid) = event {
                println!("revoked {oid}");
            }
        });
        channel.send("hello from fishpi-sdk")?;

        tokio::signal::ctrl_c().await?;
        client.chat().close(None);
        Ok::<(), Box<dyn Error>>(())
    })
}
