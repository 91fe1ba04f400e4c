//! Queue inspector binary - fetches an event queue account once and prints
//! its header and records.

use std::{process::exit, time::Duration};

use clap::Parser;
use url::Url;
use zeta_trade_indexer::{
    queue::{EventQueue, QueueRead, SequencedEvent},
    rpc::{Commitment, RpcClient},
    types::Pubkey,
};

#[derive(Parser, Debug)]
#[command(name = "queue_inspect")]
#[command(about = "Fetch an event queue account and print its records")]
struct Args {
    /// RPC URL to connect to
    #[arg(short, long)]
    rpc_url: Url,

    /// Event queue account address
    #[arg(short, long)]
    address: Pubkey,

    /// Commitment of the account read
    #[arg(short, long, default_value = "finalized")]
    commitment: Commitment,

    /// Print records appended after this sequence number instead of the most recent ones
    #[arg(short, long)]
    since: Option<u64>,

    /// Number of most recent records to print
    #[arg(short, long, default_value = "10")]
    depth: u64,
}

fn flags_symbol(event: &SequencedEvent) -> String {
    let flags = event.event.flags;
    [
        (flags.fill, 'F'),
        (flags.out, 'O'),
        (flags.bid, 'B'),
        (flags.maker, 'M'),
        (flags.release_funds, 'R'),
    ]
    .into_iter()
    .map(|(set, symbol)| if set { symbol } else { '-' })
    .collect()
}

fn print_event(event: &SequencedEvent) {
    let raw = &event.event;
    println!(
        "  #{:<10} {} paid:{:<14} released:{:<14} fee:{:<10} order:{:<40} open_orders:{}",
        event.seq_num,
        flags_symbol(event),
        raw.native_qty_paid,
        raw.native_qty_released,
        raw.native_fee_or_rebate,
        raw.order_id,
        raw.owner_handle,
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let client = match RpcClient::new(args.rpc_url, args.commitment, Duration::from_secs(30)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create RPC client: {}", e);
            exit(1);
        }
    };

    let account = match client.get_account(&args.address).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            eprintln!("Account {} not found", args.address);
            exit(1);
        }
        Err(e) => {
            eprintln!("Failed to fetch account: {}", e);
            exit(1);
        }
    };

    let queue = match EventQueue::parse(&account.data) {
        Ok(queue) => queue,
        Err(e) => {
            eprintln!("Failed to decode event queue: {}", e);
            exit(1);
        }
    };

    let header = queue.header();
    println!("Event queue {} at slot {}", args.address, account.slot);
    println!(
        "  owner: {}  capacity: {}  head: {}  count: {}  write cursor: {}  seq_num: {}",
        account.owner,
        queue.capacity(),
        header.head(),
        header.count(),
        queue.write_cursor(),
        header.seq_num(),
    );
    println!();

    let events = match args.since {
        Some(since) => match queue.read_since(Some(since)) {
            Ok(QueueRead::Fresh { events, .. }) => {
                println!("{} records appended after {}:", events.len(), since);
                events
            }
            Ok(QueueRead::Stale { .. }) => {
                println!("Queue is behind sequence number {}", since);
                return;
            }
            Ok(QueueRead::Gap { .. }) => {
                println!(
                    "Records after {} were overwritten, {} lost",
                    since,
                    header.seq_num() - since - header.count()
                );
                return;
            }
            Err(e) => {
                eprintln!("Failed to read records: {}", e);
                exit(1);
            }
        },
        None => match queue.recent(args.depth) {
            Ok(events) => {
                println!("{} most recent records:", events.len());
                events
            }
            Err(e) => {
                eprintln!("Failed to read records: {}", e);
                exit(1);
            }
        },
    };

    for event in &events {
        print_event(event);
    }
}
