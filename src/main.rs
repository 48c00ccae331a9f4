use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tk2k::archive::Archive;
use tk2k::tree::flags;
use tracing::info;

#[derive(Parser)]
#[command(name = "tk2k", version = "1.0.0", about = "The .tk2k container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive from a set of input files
    Create {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Add files into an existing archive's root folder, then repack
    Add {
        archive: PathBuf,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Remove nodes by lookup_id and repack the archive
    Remove {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        ids: Vec<u64>,
    },
    /// Unpack an archive's full tree to a directory
    Unpack {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List every folder and file with its lookup_id
    List { archive: PathBuf },
    /// Show archive-level summary information
    Info { archive: PathBuf },
}

#[derive(clap::Args)]
struct PipelineArgs {
    /// Apply Burrows-Wheeler transform
    #[arg(long)]
    bwt: bool,
    /// Apply move-to-front
    #[arg(long)]
    mtf: bool,
    /// Apply RLE-v2
    #[arg(long)]
    rle: bool,
    /// Apply order-0 arithmetic coding
    #[arg(long)]
    ac0: bool,
    /// Apply order-1 arithmetic coding
    #[arg(long)]
    ac1: bool,
    /// Apply rANS
    #[arg(long)]
    rans: bool,
    /// Checksum trailer: none (default), crc32, sha1, sha256
    #[arg(long, default_value = "none")]
    checksum: String,
}

impl PipelineArgs {
    fn to_flags(&self) -> Result<u16, Box<dyn std::error::Error>> {
        let mut f = 0u16;
        if self.bwt { f |= flags::BWT; }
        if self.mtf { f |= flags::MTF; }
        if self.rle { f |= flags::RLE; }
        if self.ac0 { f |= flags::AC_ORDER0; }
        if self.ac1 { f |= flags::AC_ORDER1; }
        if self.rans { f |= flags::RANS; }
        match self.checksum.as_str() {
            "none" => {}
            "crc32" => f |= flags::CRC32,
            "sha1" => f |= flags::SHA1,
            "sha256" => f |= flags::SHA256,
            other => return Err(format!("unknown checksum kind '{other}'").into()),
        }
        Ok(f)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Commands::Create { output, input, pipeline } => {
            let flags = pipeline.to_flags()?;
            let name = output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or("output path has no file name")?;
            let mut archive = Archive::open_empty(&name);
            for path in &input {
                archive.add_file(1, path, flags)?;
                info!(path = %path.display(), "staged file");
            }
            archive.save(&output)?;
            println!("Created: {}", output.display());
        }

        Commands::Add { archive, input, pipeline } => {
            let flags = pipeline.to_flags()?;
            let mut ar = Archive::load(&archive)?;
            for path in &input {
                let id = ar.add_file(1, path, flags)?;
                info!(id, path = %path.display(), "staged file");
            }
            ar.save(&archive)?;
            println!("Updated: {}", archive.display());
        }

        Commands::Remove { archive, ids } => {
            let mut ar = Archive::load(&archive)?;
            ar.remove_nodes(&ids)?;
            println!("Removed {} node(s) from {}", ids.len(), archive.display());
        }

        Commands::Unpack { archive, output_dir } => {
            let mut ar = Archive::load(&archive)?;
            ar.unpack_all(&output_dir)?;
            println!("Unpacked to: {}", output_dir.display());
        }

        Commands::List { archive } => {
            let ar = Archive::load(&archive)?;
            println!("Archive: {}", archive.display());
            print!("{}", ar.root.recursive_string());
        }

        Commands::Info { archive } => {
            let ar = Archive::load(&archive)?;
            let file_size = std::fs::metadata(&archive)?.len();
            println!("── .tk2k Archive ────────────────────────────────────────");
            println!("  Path           {}", archive.display());
            println!("  File size      {} B ({:.2} MiB)", file_size, file_size as f64 / 1_048_576.0);
            println!("  Root name      {}", ar.root.name);
            println!("  Folders        {}", ar.lookup_folder_ids().len());
            println!("  Files          {}", ar.lookup_file_ids().len());
            println!();
            print!("{}", ar.root.recursive_string());
        }
    }

    Ok(())
}
