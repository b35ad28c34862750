use clap::Parser;
use upnp_node::{Message, Node, NodeConfig, ScanCallback, Scanner};

#[derive(Parser, Debug)]
struct Args {
    /// Urn to search for; omit to search ssdp:all
    #[clap(long)]
    urn: Option<String>,

    #[clap(long, default_value = "3")]
    mx: u32,
}

struct PrintCallback;

impl ScanCallback for PrintCallback {
    fn on_message_received(&self, scanner: &Scanner, reply: bool, search_id: i64) {
        let kind = if reply { "reply" } else { "alive" };
        println!("[{search_id}] {kind} matching {:?}", scanner.matcher());
    }

    fn on_message_byebye(&self, _scanner: &Scanner, search_id: i64) {
        println!("[{search_id}] byebye");
    }

    fn on_search_timed_out(&self, _scanner: &Scanner, search_id: i64) {
        println!("[{search_id}] search timed out");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let node = Node::new(NodeConfig::default().mx(args.mx));
    node.start().await.unwrap();

    let matcher = Message::query(None, args.urn.clone());
    let scanner = node.start_scan(matcher, Box::new(PrintCallback)).await.unwrap();
    scanner.search(1);

    tokio::time::sleep(std::time::Duration::from_secs(args.mx as u64 + 2)).await;
    scanner.close().await;
    node.close().await.unwrap();
}
