// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunOptions),
    List(ListOptions),
}

/// Runtime configuration options for the runner.
#[derive(Debug, Parser)]
#[clap(verbatim_doc_comment)]
pub struct ProcessArgs {
    #[clap(subcommand)]
    pub command: Command,

    /// Suppress emission of terminal control codes in the runner's log output.
    #[clap(long, conflicts_with = "emit_bunyan")]
    pub disable_ansi: bool,

    /// Emit Bunyan-formatted logs.
    #[clap(long)]
    pub emit_bunyan: bool,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RunOptions {
    /// The OpenStack `clouds.yaml` describing how to reach the bare metal
    /// service.
    #[clap(long, env = "OS_CLIENT_CONFIG_FILE", default_value = "clouds.yaml")]
    pub clouds_file: Utf8PathBuf,

    /// The entry in the clouds file to use.
    #[clap(long, env = "OS_CLOUD", default_value = "bifrost-admin")]
    pub cloud: String,

    /// A YAML or JSON file listing the physical nodes the tests may enroll,
    /// with their power credentials and NIC MAC addresses.
    #[clap(long, default_value = "nodes_creds.yaml")]
    pub nodes_inventory: Utf8PathBuf,

    /// A TOML file overriding the suite's default timeouts, credentials,
    /// images and cleanup policy. Environment overrides apply on top.
    #[clap(long, value_parser)]
    pub config_toml: Option<Utf8PathBuf>,

    /// The directory the results file is written to. Takes precedence over
    /// the configuration file and `TEST_REPORTS_DIR`.
    #[clap(long, value_parser)]
    pub reports_dir: Option<Utf8PathBuf>,

    /// Only run tests whose fully-qualified names or ids contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Only run tests whose fully-qualified names and ids do not contain this
    /// string. Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ListOptions {
    /// Only list tests whose fully-qualified names or ids contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Only list tests whose fully-qualified names and ids do not contain
    /// this string. Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}
