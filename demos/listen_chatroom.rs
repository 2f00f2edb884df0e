use std::error::Error;

use fishpi_sdk::chatroom::{ChatRoomEvent, ChatRoomEventKind, MessageContent};
use fishpi_sdk::{ClientConfig, FishPi};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fishpi_sdk=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let api_key = "REPLACE_WITH_API_KEY".to_string();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = FishPi::new(ClientConfig::default().with_token(SecretString::new(api_key)))?;
        let room = client.chatroom();

        room.on(ChatRoomEventKind::All, |event: &ChatRoomEvent| match event {
            ChatRoomEvent::Online { users, discussing } => {
                println!("online={} topic={discussing}", users.len());
            }
            ChatRoomEvent::Msg(message) => {
                if let MessageContent::Text(text) = &message.content {
                    println!("{}: {text}", message.user_name);
                }
            }
            ChatRoomEvent::RedPacket(message) => {
                println!("{} sent a red packet ({})", message.user_name, message.oid);
            }
            ChatRoomEvent::Revoke(oid) => println!("revoked {oid}"),
            _ => {}
        });
        room.on(ChatRoomEventKind::Close, |event: &ChatRoomEvent| {
            println!("closed: {event:?}");
        });

        room.connect_recommended_node().await?;
        for message in room.history(1, Default::default()).await?.iter().rev() {
            println!("[history] {}: {}", message.user_name, message.md);
        }

        tokio::signal::ctrl_c().await?;
        client.close();
        Ok::<(), Box<dyn Error>>(())
    })
}
