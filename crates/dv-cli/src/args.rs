use std::collections::BTreeMap;
use std::path::PathBuf;

use color_eyre::eyre::{bail, eyre, Result};

pub const USAGE: &str = "\
usage: dvctl [--debug] [--config <file>] <command>

commands:
  publish <name> --descriptor <file> [--source <name>]... [--model <name>]
                 [--revision <n>] [--odata] [--env KEY=VALUE]... [--image-stream <stream>]
  status <name> [--json]
  log <name>
  delete <name>
  help";

/// Options for a publish request, before the descriptor is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArgs {
    pub name: String,
    pub descriptor: PathBuf,
    pub model: String,
    pub sources: Vec<String>,
    pub revision: u64,
    pub enable_odata: bool,
    pub env: BTreeMap<String, String>,
    pub image_stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Publish(PublishArgs),
    Status { name: String, json: bool },
    Log { name: String },
    Delete { name: String },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub command: Command,
}

/// Parse everything after the program name.
pub fn parse(args: &[String]) -> Result<Cli> {
    let mut debug = false;
    let mut config = None;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" => debug = true,
            "--config" => config = Some(PathBuf::from(value(&mut iter, "--config")?)),
            _ => rest.push(arg.clone()),
        }
    }

    let command = match rest.first().map(String::as_str) {
        None | Some("help") | Some("--help") | Some("-h") => Command::Help,
        Some("publish") => Command::Publish(parse_publish(&rest[1..])?),
        Some("status") => {
            let json = rest[1..].iter().any(|a| a == "--json");
            let name = positional(&rest[1..], "status")?;
            Command::Status { name, json }
        }
        Some("log") => Command::Log {
            name: positional(&rest[1..], "log")?,
        },
        Some("delete") => Command::Delete {
            name: positional(&rest[1..], "delete")?,
        },
        Some(other) => bail!("unknown command '{other}'"),
    };

    Ok(Cli {
        debug,
        config,
        command,
    })
}

fn parse_publish(args: &[String]) -> Result<PublishArgs> {
    let mut name = None;
    let mut descriptor = None;
    let mut model = None;
    let mut sources = Vec::new();
    let mut revision = 1;
    let mut enable_odata = false;
    let mut env = BTreeMap::new();
    let mut image_stream = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--descriptor" => descriptor = Some(PathBuf::from(value(&mut iter, "--descriptor")?)),
            "--model" => model = Some(value(&mut iter, "--model")?.to_string()),
            "--source" => sources.push(value(&mut iter, "--source")?.to_string()),
            "--revision" => {
                let raw = value(&mut iter, "--revision")?;
                revision = raw
                    .parse()
                    .map_err(|_| eyre!("--revision expects a number, got '{raw}'"))?;
            }
            "--odata" => enable_odata = true,
            "--env" => {
                let pair = value(&mut iter, "--env")?;
                let (key, val) = pair
                    .split_once('=')
                    .ok_or_else(|| eyre!("--env expects KEY=VALUE, got '{pair}'"))?;
                env.insert(key.to_string(), val.to_string());
            }
            "--image-stream" => image_stream = Some(value(&mut iter, "--image-stream")?.to_string()),
            flag if flag.starts_with("--") => bail!("unknown publish option '{flag}'"),
            _ if name.is_none() => name = Some(arg.clone()),
            extra => bail!("unexpected argument '{extra}'"),
        }
    }

    let name = name.ok_or_else(|| eyre!("publish needs a virtualization name"))?;
    let descriptor = descriptor.ok_or_else(|| eyre!("publish needs --descriptor <file>"))?;
    Ok(PublishArgs {
        model: model.unwrap_or_else(|| name.clone()),
        name,
        descriptor,
        sources,
        revision,
        enable_odata,
        env,
        image_stream,
    })
}

fn value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| eyre!("{flag} needs a value"))
}

fn positional(args: &[String], command: &str) -> Result<String> {
    args.iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .ok_or_else(|| eyre!("{command} needs a virtualization name"))
}
