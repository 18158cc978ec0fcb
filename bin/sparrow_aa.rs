//! `sparrow-aa <selector>` -- a thin driver over one library entry point:
//! validates and resolves an alias-analysis selector string. This crate
//! has no IR loader or bug-report emitter of its own; this binary only
//! exercises the config-parsing/dispatch surface.

use sparrow_pta::alias::AAConfig;

fn main() {
    env_logger::init();

    let selector = match std::env::args().nth(1) {
        Some(s) => s,
        None => {
            eprintln!("usage: sparrow-aa <selector>  (e.g. sparrow-aa-1cfa, tpa-2cfa, combined, dyck)");
            std::process::exit(2);
        }
    };

    match AAConfig::parse(&selector) {
        Ok(config) => {
            log::info!("resolved selector {selector:?} to {config:?}");
            println!("{}", serde_json::to_string_pretty(&config).expect("AAConfig always serializes"));
        }
        Err(e) => {
            eprintln!("invalid selector {selector:?}: {e}");
            std::process::exit(1);
        }
    }
}
