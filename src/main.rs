mod camera;
mod core;
mod video;

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use crate::camera::MediaService;
use crate::core::{EmulatorConfig, MediaError};
use crate::video::{CameraMode, FfmpegTool, FileStreamSink, MonotonicClock};

const HELP: &str = "\
commands:
  file <path>                  set the playback file
  play | pause | stop          control playback
  seek <ms>                    seek and resume playing
  status                       print playback status
  mode [shoot|record|playback] print or switch camera mode
  list                         list media files
  info <path>                  print original file info
  read <path> <offset> <len>   read bytes of the original file
  thumb <path> [off len|drop]  create, read or destroy a thumbnail
  screen <path> [off len|drop] create, read or destroy a screen-nail
  delete <path>                delete a media file
  quit";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EmulatorConfig::load()?;
    config.ensure_directories()?;

    let tool = Arc::new(FfmpegTool::from_config(&config));
    let sink = FileStreamSink::create(&config.stream_output, config.stream_bandwidth_limit)
        .map_err(|e| anyhow::anyhow!("Failed to open stream output {}: {}", config.stream_output.display(), e))?;

    let mut service = MediaService::new(config, tool, Arc::new(MonotonicClock::new()));
    service.start_stream(Box::new(sink))?;

    println!("{}", HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = args.split_first() else {
            continue;
        };
        if command == "quit" || command == "exit" {
            break;
        }
        if let Err(e) = run_command(&service, command, rest) {
            match e.downcast_ref::<MediaError>() {
                Some(media_err) => println!("error ({:?}): {}", media_err.kind(), media_err),
                None => println!("error: {}", e),
            }
        }
        std::io::stdout().flush()?;
    }

    service.shutdown();
    Ok(())
}

fn run_command(service: &MediaService, command: &str, args: &[&str]) -> anyhow::Result<()> {
    match (command, args) {
        ("file", [path]) => service.set_media_playback_file(Path::new(path))?,
        ("play", []) => service.start_media_playback()?,
        ("pause", []) => service.pause_media_playback()?,
        ("stop", []) => service.stop_media_playback()?,
        ("seek", [ms]) => service.seek_media_playback(ms.parse()?)?,
        ("status", []) => {
            match service.current_playback_file()? {
                Some(path) => println!("file: {}", path.display()),
                None => println!("file: (none)"),
            }
            println!("{}", serde_json::to_string_pretty(&service.get_media_playback_status()?)?)
        }
        ("mode", []) => println!("camera mode: {:?}", service.camera_mode()?),
        ("mode", [mode]) => {
            let mode = match *mode {
                "shoot" => CameraMode::ShootPhoto,
                "record" => CameraMode::RecordVideo,
                "playback" => CameraMode::Playback,
                other => anyhow::bail!("unknown camera mode '{}'", other),
            };
            service.set_camera_mode(mode)?;
        }
        ("list", []) => {
            println!("media directory: {}", service.get_media_file_dir().display());
            for file in service.list_media_files()? {
                println!(
                    "{:>5} {:>12} {} {}",
                    format!("{:?}", file.file_type),
                    file.size,
                    file.modified.format("%Y-%m-%d %H:%M:%S"),
                    file.path.display()
                );
            }
        }
        ("info", [path]) => {
            println!("{}", serde_json::to_string_pretty(&service.get_media_file_origin_info(Path::new(path))?)?)
        }
        ("read", [path, offset, length]) => {
            let data = service.get_media_file_origin_data(Path::new(path), offset.parse()?, length.parse()?)?;
            print_bytes(&data);
        }
        ("thumb", [path]) => {
            service.create_media_file_thumbnail(Path::new(path))?;
            println!("thumbnail: {} bytes", service.get_media_file_thumbnail_info(Path::new(path))?);
        }
        ("thumb", [path, "drop"]) => service.destroy_media_file_thumbnail(Path::new(path))?,
        ("thumb", [path, offset, length]) => {
            print_bytes(&service.get_media_file_thumbnail_data(Path::new(path), offset.parse()?, length.parse()?)?)
        }
        ("screen", [path]) => {
            service.create_media_file_screennail(Path::new(path))?;
            println!("screen-nail: {} bytes", service.get_media_file_screennail_info(Path::new(path))?);
        }
        ("screen", [path, "drop"]) => service.destroy_media_file_screennail(Path::new(path))?,
        ("screen", [path, offset, length]) => {
            print_bytes(&service.get_media_file_screennail_data(Path::new(path), offset.parse()?, length.parse()?)?)
        }
        ("delete", [path]) => service.delete_media_file(Path::new(path))?,
        ("help", _) => println!("{}", HELP),
        _ => anyhow::bail!("unrecognised command, type 'help'"),
    }
    Ok(())
}

fn print_bytes(data: &[u8]) {
    println!("{} bytes", data.len());
    for row in data.chunks(16).take(8) {
        let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {}", hex.join(" "));
    }
}
