//! Worker argument surfaces.
//!
//! The dispatcher builds these argv lines at launch; keeping them as clap
//! derives means the workers can also be run by hand when debugging a
//! host.

use std::path::PathBuf;

use clap::Parser;

/// Arguments of the sf (send) worker.
#[derive(Clone, Debug, Parser)]
#[command(name = "afd-sf", about = "AFD send worker", disable_version_flag = true)]
pub struct SendArgs {
    /// AFD working directory.
    #[arg(long, env = "AFD_WORK_DIR")]
    pub work_dir: PathBuf,

    /// Message name of the bundle to deliver.
    #[arg(long)]
    pub msg_name: String,

    /// Index of the destination host record.
    #[arg(long)]
    pub host_index: usize,

    /// Job slot this worker occupies on the host.
    #[arg(long)]
    pub slot: usize,

    /// Connection slot in the dispatcher's live-worker table.
    #[arg(long)]
    pub connect_pos: usize,

    /// Retries this entry has already been through.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// This is an operator-requested resend.
    #[arg(long, default_value_t = false)]
    pub resend: bool,

    /// Never archive, even when the job asks for it.
    #[arg(long, default_value_t = false)]
    pub disable_archive: bool,

    /// Age limit applied when the job carries none.
    #[arg(long)]
    pub default_age_limit: Option<u32>,
}

/// Arguments of the gf (retrieve) worker.
#[derive(Clone, Debug, Parser)]
#[command(name = "afd-gf", about = "AFD retrieve worker", disable_version_flag = true)]
pub struct FetchArgs {
    /// AFD working directory.
    #[arg(long, env = "AFD_WORK_DIR")]
    pub work_dir: PathBuf,

    /// Index of the directory record to poll.
    #[arg(long)]
    pub dir_index: usize,

    /// Index of the source's host record.
    #[arg(long)]
    pub host_index: usize,

    /// Job slot this worker occupies on the host.
    #[arg(long)]
    pub slot: usize,

    /// Connection slot in the dispatcher's live-worker table.
    #[arg(long)]
    pub connect_pos: usize,
}
