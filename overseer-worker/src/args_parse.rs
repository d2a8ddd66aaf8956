use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) node_id: Option<String>,
    pub(crate) meta_store_addr: Option<String>,
    pub(crate) webhook_url: Option<String>,
}

impl Args {
    fn show_usage() {
        println!("Overseer Worker Usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --node-id            Stable node identifier (random when omitted)");
        println!("  --meta-store-addr    Metadata store (etcd) address, overrides config");
        println!("  --webhook-url        Notification endpoint, overrides config");
    }

    pub(crate) fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        if args.len() <= 1 {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        let mut config_file = None;
        let mut node_id = None;
        let mut meta_store_addr = None;
        let mut webhook_url = None;

        let mut args_iter = args.iter().skip(1);
        while let Some(arg) = args_iter.next() {
            match arg.as_str() {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--node-id" => {
                    node_id = args_iter.next().map(|s| s.to_string());
                }
                "--meta-store-addr" => {
                    meta_store_addr = args_iter.next().map(|s| s.to_string());
                }
                "--webhook-url" => {
                    webhook_url = args_iter.next().map(|s| s.to_string());
                }
                _ => return Err(anyhow::anyhow!("Unknown argument: {}", arg)),
            }
        }

        Ok(Args {
            config_file: config_file
                .ok_or_else(|| anyhow::anyhow!("Missing required --config-file"))?,
            node_id,
            meta_store_addr,
            webhook_url,
        })
    }
}
