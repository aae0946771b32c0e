use clap::{Parser, Subcommand};
use magick_gate::config::{self, ServiceConfig};
use magick_gate::imaging::{PlanContext, plan_pipeline};
use magick_gate::options::TransformOptions;
use magick_gate::output::{self, Check};
use magick_gate::server;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "magick-gate")]
#[command(about = "HTTP image transformation service backed by ImageMagick")]
#[command(long_about = "\
HTTP image transformation service backed by ImageMagick

Images are transformed on request according to query options and streamed
back as they are produced:

  GET /images/photos/cat.jpg?size=200x200&maintain_ratio=1&crop=1
  GET /remote?src=https://www.gravatar.com/avatar/<hash>&size=80x80&format=png
  GET /health

Options (all optional, applied in this order):
  size=WxH  maintain_ratio=1  crop=1  crop_anchor=<anchor>
  extent=1  extent_size=WxH  extent_anchor  extent_background=#RRGGBBAA
            extent_compose=over|add|subtract  extent_shift=XxY
  splice=1  splice_size  splice_anchor  splice_background  splice_compose
  post_crop_size=WxH  post_crop_anchor
  reflection_height=N  reflection_alpha_top=A  reflection_alpha_bottom=B
  normalize=1  equalize=1  contrast_stretch=BxW  brightness_contrast=BxC
  overlay_image=a.png,b.png
  format=jpeg|png|png16

Anchors: left right top bottom middle center topleft topright bottomleft
bottomright.

Run 'magick-gate gen-config' to generate a documented magick-gate.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./magick-gate.toml if present)
    #[arg(long, global = true, env = "MAGICK_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        /// Override [server] bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Show the convert pipeline a query string would run
    Plan {
        /// Query string, e.g. "size=200x100&maintain_ratio=1&crop=1"
        query: String,
    },
    /// Validate config and check that external tools and directories exist
    Check,
    /// Print a stock magick-gate.toml with all options documented
    GenConfig,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "magick_gate=debug,tower_http=debug"
    } else {
        "magick_gate=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Serve { bind } => {
            let mut config = config::load_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind = bind.to_string();
            }
            for line in output::format_config_summary(&config) {
                tracing::info!("{}", line.trim_start());
            }
            server::serve(config).await?;
        }
        Command::Plan { query } => {
            let config = config::load_config(cli.config.as_deref())?;
            let options = TransformOptions::from_query(&parse_query(&query))?;
            let context = PlanContext {
                overlay_dir: config.sources.overlay_dir.as_deref(),
                dither_colormap: config.convert.dither_colormap.as_deref(),
                max_dimension: config.limits.max_dimension,
            };
            let pipeline = plan_pipeline(&options, &context)?;
            for line in output::format_plan_output(&pipeline, &config.convert.convert_path) {
                println!("{}", line);
            }
        }
        Command::Check => {
            let config = config::load_config(cli.config.as_deref())?;
            for line in output::format_config_summary(&config) {
                println!("{}", line);
            }
            println!();
            let checks = run_checks(&config);
            for line in output::format_check_output(&checks) {
                println!("{}", line);
            }
            if checks.iter().any(|c| c.outcome.is_err()) {
                std::process::exit(1);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Parse `a=1&b=2` (a leading `?` is allowed) into a query map.
fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

fn run_checks(config: &ServiceConfig) -> Vec<Check> {
    let mut checks = vec![Check {
        name: "convert",
        outcome: tool_version(&config.convert.convert_path, "-version"),
    }];
    if config.sources.allow_remote {
        checks.push(Check {
            name: "curl",
            outcome: tool_version(&config.convert.curl_path, "--version"),
        });
    }
    checks.push(Check {
        name: "image_dir",
        outcome: existing_dir(&config.sources.image_dir),
    });
    if let Some(dir) = &config.sources.overlay_dir {
        checks.push(Check {
            name: "overlay_dir",
            outcome: existing_dir(dir),
        });
    }
    if let Some(colormap) = &config.convert.dither_colormap {
        checks.push(Check {
            name: "dither_colormap",
            outcome: if colormap.is_file() {
                Ok(colormap.display().to_string())
            } else {
                Err(format!("{} (not a file)", colormap.display()))
            },
        });
    }
    if config.cache.enabled {
        checks.push(Check {
            name: "cache.dir",
            outcome: std::fs::create_dir_all(&config.cache.dir)
                .map(|()| config.cache.dir.display().to_string())
                .map_err(|e| format!("{}: {e}", config.cache.dir.display())),
        });
    }
    checks
}

/// Run `<program> <flag>` and return the first line of its output.
fn tool_version(program: &str, flag: &str) -> Result<String, String> {
    let out = std::process::Command::new(program)
        .arg(flag)
        .output()
        .map_err(|e| format!("{program}: {e}"))?;
    if !out.status.success() {
        return Err(format!("{program} {flag} exited with {}", out.status));
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout.lines().next().unwrap_or(program).trim().to_string())
}

fn existing_dir(path: &Path) -> Result<String, String> {
    if path.is_dir() {
        Ok(path.display().to_string())
    } else {
        Err(format!("{} (not a directory)", path.display()))
    }
}
