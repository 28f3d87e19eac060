//! Subcommands that talk to relays.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use serde_json::json;
use spore::{Event, Filter, Kind, Metadata, Subscription, Tag, nip19};
use spore_client::{Client, ClientConfig};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Event content
    pub content: String,

    #[arg(long, default_value_t = Kind::TEXT_NOTE.as_u16())]
    pub kind: u16,

    /// Tag as comma-separated parts, e.g. `e,<event id>` (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// How long to wait for relay acknowledgements
    #[arg(long, default_value_t = 5_000)]
    pub wait_ms: u64,
}

#[derive(Args, Debug, Default)]
pub struct SubscribeArgs {
    /// Subscription id; generated when omitted
    #[arg(long)]
    pub id: Option<String>,

    /// Author public key, hex or npub (repeatable)
    #[arg(long = "author")]
    pub authors: Vec<String>,

    #[arg(long = "kind")]
    pub kinds: Vec<u16>,

    /// Referenced event id, `#e` (repeatable)
    #[arg(long = "event-ref")]
    pub event_refs: Vec<String>,

    /// Referenced public key, `#p` (repeatable)
    #[arg(long = "pubkey-ref")]
    pub pubkey_refs: Vec<String>,

    #[arg(long = "hashtag")]
    pub hashtags: Vec<String>,

    #[arg(long)]
    pub since: Option<i64>,

    #[arg(long)]
    pub until: Option<i64>,

    #[arg(long)]
    pub limit: Option<u64>,

    /// Keep streaming new events until interrupted
    #[arg(long)]
    pub follow: bool,

    /// Collect timeout; defaults to SPORE_COLLECT_TIMEOUT_MS
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Fetch the newest profile for a public key
    Get {
        pubkey: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Publish profile metadata signed with the configured key
    Update(ProfileUpdateArgs),
}

#[derive(Args, Debug, Default)]
pub struct ProfileUpdateArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub display_name: Option<String>,
    #[arg(long)]
    pub about: Option<String>,
    #[arg(long)]
    pub picture: Option<String>,
    #[arg(long)]
    pub nip05: Option<String>,
}

#[derive(Args, Debug)]
pub struct ContactsArgs {
    /// Public key, hex or npub
    pub pubkey: String,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

pub async fn publish(args: PublishArgs, config: ClientConfig) -> Result<()> {
    let tags = parse_tags(&args.tags)?;
    let client = connected_client(config).await?;
    let event = client
        .create_event(Kind(args.kind), tags, args.content)
        .context("failed to sign event")?;

    let confirmations = client
        .publish_and_wait(&event, Duration::from_millis(args.wait_ms))
        .await
        .context("failed to publish event")?;
    if confirmations.is_empty() {
        warn!("no relay acknowledged event {}", event.id);
    }
    for refusal in confirmations
        .iter()
        .filter_map(|confirmation| confirmation.ensure_accepted().err())
    {
        warn!("{}", refusal);
    }

    let output = json!({
        "id": event.id,
        "confirmations": confirmations
            .iter()
            .map(|confirmation| json!({
                "relay": confirmation.relay_url,
                "accepted": confirmation.accepted,
                "message": confirmation.message,
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    client.disconnect().await?;
    Ok(())
}

pub async fn subscribe(args: SubscribeArgs, config: ClientConfig) -> Result<()> {
    let filter = build_filter(&args)?;
    let subscription = match args.id.clone() {
        Some(id) => Subscription::with_id(id, vec![filter]),
        None => Subscription::new(vec![filter]),
    };
    let client = connected_client(config).await?;

    if args.follow {
        follow(&client, subscription).await?;
    } else {
        let mut events = client
            .subscribe_and_collect(subscription, args.timeout_ms.map(Duration::from_millis))
            .await
            .context("subscription failed")?;
        events.sort_by_key(|event| event.created_at);
        for event in &events {
            print_event(event)?;
        }
        info!("received {} events", events.len());
    }

    client.disconnect().await?;
    Ok(())
}

async fn follow(client: &Client, subscription: Subscription) -> Result<()> {
    let id = subscription.id.clone();
    let mut events = client.subscribe(subscription).await?;
    info!("streaming subscription {}; press ctrl-c to stop", id);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    client.unsubscribe(&id).await?;
    Ok(())
}

pub async fn profile(args: ProfileArgs, config: ClientConfig) -> Result<()> {
    match args.command {
        ProfileCommand::Get { pubkey, timeout_ms } => {
            let client = connected_client(config).await?;
            let metadata = client
                .fetch_profile(&pubkey, timeout_ms.map(Duration::from_millis))
                .await
                .with_context(|| format!("failed to fetch profile for {pubkey}"))?;
            match metadata {
                Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
                None => bail!("no profile found for {pubkey}"),
            }
            client.disconnect().await?;
        }
        ProfileCommand::Update(update) => {
            let metadata = metadata_from(update);
            if metadata.is_empty() {
                bail!("nothing to update: pass at least one profile field");
            }
            let client = connected_client(config).await?;
            let event = client
                .update_profile(&metadata)
                .await
                .context("failed to publish profile")?;
            println!("{}", event.id);
            client.disconnect().await?;
        }
    }
    Ok(())
}

pub async fn contacts(args: ContactsArgs, config: ClientConfig) -> Result<()> {
    let client = connected_client(config).await?;
    let contacts = client
        .fetch_contacts(&args.pubkey, args.timeout_ms.map(Duration::from_millis))
        .await
        .with_context(|| format!("failed to fetch contacts for {}", args.pubkey))?;
    for pubkey in contacts {
        println!("{pubkey}");
    }
    client.disconnect().await?;
    Ok(())
}

async fn connected_client(config: ClientConfig) -> Result<Client> {
    if config.relays.is_empty() {
        bail!("no relays configured: pass --relay or set SPORE_RELAYS");
    }
    let client = Client::new(config).await?;
    client.connect().await.context("failed to connect to relays")?;
    Ok(client)
}

fn print_event(event: &Event) -> Result<()> {
    println!("{}", event.to_json()?);
    Ok(())
}

fn parse_tags(raw: &[String]) -> Result<Vec<Tag>> {
    raw.iter()
        .map(|tag| {
            let parts = tag.split(',').map(|part| part.trim().to_string()).collect();
            Tag::from_parts(parts).with_context(|| format!("invalid tag {tag:?}"))
        })
        .collect()
}

fn build_filter(args: &SubscribeArgs) -> Result<Filter> {
    let mut filter = Filter::new();
    if !args.authors.is_empty() {
        let authors = args
            .authors
            .iter()
            .map(|author| {
                nip19::decode_public_key(author).with_context(|| format!("invalid author {author}"))
            })
            .collect::<Result<Vec<_>>>()?;
        filter = filter.authors(authors);
    }
    if !args.kinds.is_empty() {
        filter = filter.kinds(args.kinds.iter().copied().map(Kind));
    }
    if !args.event_refs.is_empty() {
        filter = filter.event_refs(args.event_refs.iter().cloned());
    }
    if !args.pubkey_refs.is_empty() {
        let pubkeys = args
            .pubkey_refs
            .iter()
            .map(|pubkey| nip19::decode_public_key(pubkey))
            .collect::<Result<Vec<_>, _>>()?;
        filter = filter.pubkey_refs(pubkeys);
    }
    if !args.hashtags.is_empty() {
        filter = filter.hashtags(args.hashtags.iter().cloned());
    }
    if let Some(since) = args.since {
        filter = filter.since(since);
    }
    if let Some(until) = args.until {
        filter = filter.until(until);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    Ok(filter)
}

fn metadata_from(update: ProfileUpdateArgs) -> Metadata {
    Metadata {
        name: update.name,
        display_name: update.display_name,
        about: update.about,
        picture: update.picture,
        nip05: update.nip05,
    }
}
