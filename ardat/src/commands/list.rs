use std::path::PathBuf;

use ardat_format::fs::{MODIFY_TIME, UNIX_MODE};
use ardat_format::{ArchEntityInfo, RecordKind};

use crate::error::{Error, Result};

#[inline(always)]
fn time(info: &ArchEntityInfo) -> String {
    info.properties()
        .get_property(MODIFY_TIME)
        .and_then(|x| x.parse::<u64>().ok())
        .map(|x| std::time::UNIX_EPOCH + std::time::Duration::from_millis(x))
        .map(|x| {
            let datetime: chrono::DateTime<chrono::Utc> = x.into();
            datetime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        })
        .unwrap_or_else(|| "-".into())
}

#[inline(always)]
fn mode(info: &ArchEntityInfo) -> String {
    info.properties()
        .get_property(UNIX_MODE)
        .map(|x| format!("{:0>4}", x))
        .unwrap_or_else(|| "-".into())
}

#[inline(always)]
fn format_path(info: &ArchEntityInfo) -> String {
    match info.kind() {
        RecordKind::Directory => format!("{}/", info.path()),
        RecordKind::File => info.path().to_string(),
    }
}

pub fn run(archive: PathBuf, verbose: bool) -> Result<()> {
    use humansize::{file_size_opts as options, FileSize};

    let (metadata, headers) = ardat_format::list(&archive).map_err(|source| Error::List {
        path: archive.clone(),
        source,
    })?;

    if verbose {
        for property in metadata.properties() {
            println!("{}", property);
        }
        println!();
    }

    println!("Kind          Length         Modified               Mode   Path");
    println!("------------  -------------  ---------------------  -----  --------");
    for info in headers.iter() {
        let length = match info.kind() {
            RecordKind::Directory => "-".to_string(),
            RecordKind::File => info
                .size()
                .file_size(options::BINARY)
                .unwrap_or_else(|_| info.size().to_string()),
        };

        println!(
            "{:12}  {:>12}   {:<20}   {:<5}  {}",
            format!("<{}>", info.kind()),
            length,
            time(info),
            mode(info),
            format_path(info),
        );

        if verbose {
            for property in info.properties().properties() {
                println!("{:>60}{}", "", property);
            }
        }
    }

    Ok(())
}
