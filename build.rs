// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: site root directory
fn siteroot_arg() -> Arg {
    Arg::new("siteroot")
        .short('s')
        .long("siteroot")
        .value_name("DIR")
        .help("Site root directory")
}

fn spec_args() -> [Arg; 3] {
    [
        Arg::new("name").help("Package name pattern"),
        Arg::new("version").help("Version pattern"),
        Arg::new("release").help("Release pattern"),
    ]
}

fn build_cli() -> Command {
    Command::new("sitepkr")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Installs RPM packages under a relocatable site root")
        .arg(siteroot_arg())
        .subcommand(
            Command::new("install")
                .about("Install RPMs from the configured repositories")
                .arg(Arg::new("packages").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("install-project")
                .about("Install a whole project from the repositories")
                .arg(Arg::new("project").required(true))
                .arg(Arg::new("version"))
                .arg(Arg::new("release")),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove installed RPMs")
                .arg(Arg::new("packages").required(true).num_args(1..)),
        )
        .subcommand(Command::new("update").about("Update installed RPMs"))
        .subcommand(Command::new("check").about("Check for available updates"))
        .subcommand(Command::new("list").about("List repository packages").args(spec_args()))
        .subcommand(
            Command::new("installed")
                .about("List installed packages")
                .args(spec_args()),
        )
        .subcommand(Command::new("deps").about("List package dependencies").args(spec_args()))
        .subcommand(
            Command::new("dep-graph")
                .about("Dump the dependency graph in DOT format")
                .args(spec_args()),
        )
        .subcommand(
            Command::new("provides")
                .about("List installed packages providing a file")
                .arg(Arg::new("file").required(true)),
        )
        .subcommand(
            Command::new("rpm")
                .about("Pass arguments through to the rpm binary")
                .arg(Arg::new("args").num_args(1..)),
        )
        .subcommand(
            Command::new("repo-add")
                .about("Add a repository")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("url").required(true)),
        )
        .subcommand(Command::new("repo-ls").about("List configured repositories"))
        .subcommand(
            Command::new("repo-rm")
                .about("Remove a repository")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("version").about("Print version information"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("sitepkr.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
