#[macro_use] extern crate clap;

use clap::{App, ArgMatches};
use dockyard::{
    errors::ImageError,
    image::{ImageName, Registry},
    registry::{Client, ClientBuilder},
    store::StoreConfig,
};
use env_logger::{Builder, Env};
use std::{path::Path, process, time::Duration};

fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml)
        .version(crate_version!())
        .get_matches();

    let log_level = matches.value_of("log_level").unwrap_or("warn");
    Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if let Err(err) = run(&matches) {
        eprintln!("dockyard: {}", err);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), ImageError> {
    match matches.subcommand() {
        ("ping", Some(_)) => {
            let client = client_builder(matches).open()?;
            println!("{} is available", client.registry());
        }
        ("info", Some(sub)) => {
            let image = image_arg(sub);
            let client = client_builder(matches).open()?;
            let manifest = client.get_image_info(image.repository(), image.tag())?;
            println!("{}", image);
            match &manifest.content_digest {
                Some(digest) => println!("digest {}", digest),
                None => println!("digest unknown"),
            }
            for layer in &manifest.layers {
                println!("layer {}", layer);
            }
        }
        ("exists", Some(sub)) => {
            let image = image_arg(sub);
            let exists = store_config(matches)
                .open()?
                .image_exists(image.repository(), image.tag())?;
            println!("{}", exists);
        }
        ("push", Some(sub)) => {
            let image = image_arg(sub);
            let archive = Path::new(sub.value_of("archive").unwrap_or_default());
            store_config(matches)
                .open()?
                .push_image(image.repository(), image.tag(), archive)?;
            log::info!("pushed {:?} as {}", archive, image);
        }
        ("pull", Some(sub)) => {
            let image = image_arg(sub);
            let archive = Path::new(sub.value_of("archive").unwrap_or_default());
            store_config(matches)
                .open()?
                .get_image(image.repository(), image.tag(), archive)?;
            log::info!("pulled {} into {:?}", image, archive);
        }
        ("delete", Some(sub)) => {
            let image = image_arg(sub);
            store_config(matches)
                .open()?
                .delete_image(image.repository(), image.tag())?;
        }
        _ => unreachable!("clap requires a subcommand"),
    }
    Ok(())
}

fn image_arg(matches: &ArgMatches) -> ImageName {
    value_t!(matches, "image", ImageName).unwrap_or_else(|e| e.exit())
}

fn client_builder(matches: &ArgMatches) -> ClientBuilder {
    let mut builder = Client::builder();
    if matches.is_present("registry") {
        let registry = value_t!(matches, "registry", Registry).unwrap_or_else(|e| e.exit());
        builder = builder.registry(&registry);
    }
    if matches.is_present("insecure") {
        builder = builder.insecure();
    }
    if let Some(username) = matches.value_of("username") {
        builder = builder.login(
            username.to_owned(),
            matches.value_of("password").map(str::to_owned),
        );
    }
    if matches.is_present("timeout") {
        let seconds = value_t!(matches, "timeout", u64).unwrap_or_else(|e| e.exit());
        builder = builder.request_timeout(Duration::from_secs(seconds));
    }
    builder
}

fn store_config(matches: &ArgMatches) -> StoreConfig {
    match matches.value_of("local") {
        Some(dir) => StoreConfig::Local(Path::new(dir).to_path_buf()),
        None => StoreConfig::Registry(client_builder(matches)),
    }
}
