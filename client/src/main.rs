use clap::Parser;
use storypoker_client::{run, ClientEvent, Identity, Reconciler};
use storypoker_protocol::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "storypoker-cli", about = "Planning poker room client")]
struct Args {
    /// Server base url.
    #[arg(long, default_value = "ws://127.0.0.1:9001")]
    server: String,
    /// Room code to join.
    #[arg(long)]
    room: String,
    /// Your account id.
    #[arg(long)]
    account: String,
    /// Display name shown to the room.
    #[arg(long)]
    name: String,
    /// Estimation role: SA, DEV or QA.
    #[arg(long, value_parser = parse_role, default_value = "DEV")]
    role: Role,
    /// Hint that you expect to facilitate (the server decides).
    #[arg(long)]
    facilitator: bool,
}

fn parse_role(s: &str) -> Result<Role, String> {
    match s.to_ascii_uppercase().as_str() {
        "SA" => Ok(Role::Sa),
        "DEV" => Ok(Role::Dev),
        "QA" => Ok(Role::Qa),
        other => Err(format!("unknown role {other}, expected SA, DEV or QA")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storypoker_client=info".into()),
        )
        .init();

    let args = Args::parse();
    let url = format!("{}/ws/{}", args.server, args.room);
    let identity = Identity {
        account_id: args.account,
        display_name: args.name,
        role: args.role,
        is_facilitator: args.facilitator,
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut rec = Reconciler::new(identity.clone());
    rec.on_connecting();

    tokio::spawn(run(url.clone(), identity.join_message(), cmd_rx, event_tx));
    println!("connecting to {url} ...");
    print_help();

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            ev = event_rx.recv() => match ev {
                Some(ClientEvent::Connected) => {
                    rec.on_connecting();
                    println!("connected, joining room...");
                }
                Some(ClientEvent::Disconnected) => {
                    rec.on_disconnect();
                    println!("disconnected, retrying shortly...");
                }
                Some(ClientEvent::Event(ev)) => {
                    print_event(&ev, &rec);
                    rec.apply(ev);
                }
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line == "quit" {
                        break;
                    }
                    if let Some(msg) = parse_command(line, &mut rec) {
                        let _ = cmd_tx.send(msg);
                    }
                }
                None => break,
            },
        }
    }

    println!("bye");
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  vote <hours>   - cast your estimate for the current story");
    println!("  unsure         - vote \"can't estimate\"");
    println!("  reveal         - (facilitator) expose all votes");
    println!("  final <sa> <dev> <qa>  - (facilitator) finalize, '-' to skip a role");
    println!("  next           - (facilitator) advance to the next story");
    println!("  start          - (facilitator) start the session");
    println!("  complete       - (facilitator) end the session");
    println!("  state          - show the local view of the room");
    println!("  quit           - leave");
}

fn current_story_id(rec: &Reconciler) -> Option<Uuid> {
    let id = rec.snapshot.as_ref().and_then(|s| s.current_story_id);
    if id.is_none() {
        println!("no story is open for voting right now");
    }
    id
}

fn parse_command(line: &str, rec: &mut Reconciler) -> Option<ClientToServer> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "vote" => {
            let hours: i32 = match parts.next().and_then(|h| h.parse().ok()) {
                Some(h) => h,
                None => {
                    println!("usage: vote <hours>");
                    return None;
                }
            };
            let story_id = current_story_id(rec)?;
            Some(rec.cast_vote(story_id, hours))
        }
        "unsure" => {
            let story_id = current_story_id(rec)?;
            Some(rec.cast_vote(story_id, UNSURE_HOURS))
        }
        "reveal" => {
            let story_id = current_story_id(rec)?;
            Some(ClientToServer::Reveal { story_id })
        }
        "final" => {
            let story_id = current_story_id(rec)?;
            let mut hours = ["-"; 3].map(|d| d.to_string());
            for slot in hours.iter_mut() {
                if let Some(p) = parts.next() {
                    *slot = p.to_string();
                }
            }
            let parse = |s: &str| -> Option<i32> { s.parse().ok() };
            Some(ClientToServer::SetFinal {
                story_id,
                sa_hours: parse(&hours[0]),
                dev_hours: parse(&hours[1]),
                qa_hours: parse(&hours[2]),
            })
        }
        "next" => Some(ClientToServer::NextStory),
        "start" => Some(ClientToServer::StartSession),
        "complete" => Some(ClientToServer::CompleteSession),
        "state" => {
            print_state(rec);
            None
        }
        other => {
            println!("unknown command: {other}");
            None
        }
    }
}

fn print_state(rec: &Reconciler) {
    let Some(snapshot) = &rec.snapshot else {
        println!("no snapshot yet ({:?})", rec.phase);
        return;
    };
    println!(
        "session {:?} | room {} | epic {}",
        snapshot.status, snapshot.room_code, snapshot.epic_key
    );
    for p in &snapshot.participants {
        println!(
            "  {} [{}]{}{}",
            p.display_name,
            p.role,
            if p.is_facilitator { " (facilitator)" } else { "" },
            if p.is_online { "" } else { " (offline)" },
        );
    }
    for s in &snapshot.stories {
        let marker = if Some(s.id) == snapshot.current_story_id {
            "->"
        } else {
            "  "
        };
        println!("{marker} {:?} {}", s.status, s.title);
        for v in &s.votes {
            match v.vote_hours {
                Some(UNSURE_HOURS) => {
                    println!("     {} [{}]: unsure", v.voter_display_name, v.voter_role)
                }
                Some(h) => println!("     {} [{}]: {}h", v.voter_display_name, v.voter_role, h),
                None => println!("     {} [{}]: voted", v.voter_display_name, v.voter_role),
            }
        }
    }
}

fn print_event(ev: &ServerToClient, rec: &Reconciler) {
    let story_title = |id: Uuid| {
        rec.snapshot
            .as_ref()
            .and_then(|s| s.story(id))
            .map(|s| s.title.clone())
            .unwrap_or_else(|| id.to_string())
    };
    match ev {
        ServerToClient::State { snapshot } => {
            println!(
                "synced: session {:?}, {} stories, {} participants",
                snapshot.status,
                snapshot.stories.len(),
                snapshot.participants.len()
            );
        }
        ServerToClient::ParticipantJoined { participant } => {
            println!(
                "{} joined as {}",
                participant.display_name, participant.role
            );
        }
        ServerToClient::ParticipantLeft { account_id } => {
            println!("{account_id} went offline");
        }
        ServerToClient::VoteCast {
            story_id,
            voter_account_id,
            ..
        } => {
            println!("{} voted on \"{}\"", voter_account_id, story_title(*story_id));
        }
        ServerToClient::VotesRevealed { story_id, votes } => {
            println!("votes revealed for \"{}\":", story_title(*story_id));
            for v in votes {
                match v.vote_hours {
                    Some(UNSURE_HOURS) => {
                        println!("  {} [{}]: unsure", v.voter_display_name, v.voter_role)
                    }
                    Some(h) => println!("  {} [{}]: {}h", v.voter_display_name, v.voter_role, h),
                    None => println!("  {} [{}]: no vote", v.voter_display_name, v.voter_role),
                }
            }
        }
        ServerToClient::StoryCompleted { story_id, .. } => {
            println!("story \"{}\" finalized", story_title(*story_id));
        }
        ServerToClient::CurrentStoryChanged { story_id } => {
            println!("now voting on \"{}\"", story_title(*story_id));
        }
        ServerToClient::SessionCompleted => {
            println!("session completed");
        }
        ServerToClient::Error { code, message } => {
            println!("error [{code:?}]: {message}");
        }
    }
}
