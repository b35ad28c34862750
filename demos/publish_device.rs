use clap::Parser;
use upnp_node::location::ConstDescriptor;
use upnp_node::urn::device_urn;
use upnp_node::{Message, Node, NodeConfig};

#[derive(Parser, Debug)]
struct Args {
    /// HTTP port to serve the device description on
    #[clap(long, default_value = "49999")]
    http_port: u16,

    /// Device friendly name, used to build the device urn
    #[clap(long, default_value = "ExampleDevice")]
    name: String,

    /// Cache-control lifetime in seconds
    #[clap(long, default_value = "1800")]
    ttl: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let node = Node::new(NodeConfig::default().http_port(args.http_port).ttl(args.ttl));
    node.start().await.unwrap();

    let uuid = uuid::Uuid::new_v4().to_string();
    let urn = device_urn(&args.name, 1);
    let description = ConstDescriptor::new(
        "device.xml",
        format!(
            "<?xml version=\"1.0\"?><root><device><friendlyName>{}</friendlyName></device></root>",
            args.name
        )
        .into_bytes(),
    );

    node.publish(Message::new(uuid, urn, std::sync::Arc::new(description), args.ttl))
        .await
        .unwrap();

    println!("Publishing. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await.unwrap();
    node.close().await.unwrap();
}
