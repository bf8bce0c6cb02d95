use clap::Parser;
use rand::Rng;
use shared::{FrameBuffer, Message, FIELD_HEIGHT, FIELD_WIDTH};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep_until, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless client that joins and wanders around")]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:2000")]
    server: String,

    /// Name to join with
    #[arg(short, long, default_value = "test-client")]
    name: String,

    /// Seconds to play before leaving
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Seconds between new random targets
    #[arg(short, long, default_value = "2")]
    retarget: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);

    let join = Message::Join {
        name: args.name.clone(),
    };
    stream.write_all(&join.encode()?).await?;
    println!("Sent JOIN as {:?}", args.name);

    let mut frames = FrameBuffer::new();
    let mut messages = Vec::new();
    let mut buf = [0u8; 4096];
    let mut rng = rand::thread_rng();
    let mut retarget = interval(Duration::from_secs(args.retarget.max(1)));
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut my_id = None;
    let mut position_updates = 0u64;

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,

            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    println!("Server closed the connection");
                    return Ok(());
                }
                let skipped = frames.push(&buf[..n], &mut messages)?;
                if skipped > 0 {
                    println!("Skipped {} malformed frame(s)", skipped);
                }

                for message in messages.drain(..) {
                    match message {
                        Message::JoinAck { player_id, token } => {
                            println!("Joined as player {} (token {:02x?})", player_id, token);
                            my_id = Some(player_id);
                        }
                        Message::CurrentPlayers { players } => {
                            println!("{} player(s) in game:", players.len());
                            for player in players {
                                println!("  {}: {}", player.player_id, player.name);
                            }
                        }
                        Message::PlayerJoin(player) => {
                            println!("Player {} joined: {}", player.player_id, player.name);
                        }
                        Message::PlayerLeave { player_id } => {
                            println!("Player {} left", player_id);
                        }
                        Message::PlayerPositions { positions } => {
                            position_updates += 1;
                            // Print roughly once a second at the default tick rate.
                            if position_updates % 20 == 1 {
                                if let Some(me) = positions.iter().find(|p| Some(p.player_id) == my_id) {
                                    println!("At ({:.1}, {:.1}), mass {}", me.x, me.y, me.mass);
                                }
                            }
                        }
                        Message::JoinError { code, message } => {
                            println!("Join refused ({:?}): {}", code, message);
                            return Ok(());
                        }
                        Message::Kick { reason } => {
                            println!("Kicked: {}", reason);
                            return Ok(());
                        }
                        other => println!("Unexpected message: {:?}", other),
                    }
                }
            }

            _ = retarget.tick(), if my_id.is_some() => {
                let target = Message::SetTarget {
                    x: rng.gen_range(0.0..FIELD_WIDTH),
                    y: rng.gen_range(0.0..FIELD_HEIGHT),
                };
                stream.write_all(&target.encode()?).await?;
            }
        }
    }

    stream.write_all(&Message::Leave.encode()?).await?;
    println!(
        "Sent LEAVE after {} position updates, test client finished",
        position_updates
    );

    Ok(())
}
