use std::path::Path;
use std::time::Duration;

use slate_app::session::EditorSession;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: slate <media files...>");
        std::process::exit(2);
    }

    let mut session = EditorSession::new();
    let mut assets = Vec::new();
    for arg in &args {
        match slate_media::Asset::probe(Path::new(arg)) {
            Ok(asset) => {
                println!(
                    "{arg}: {} ({}s, video: {}, audio: {})",
                    asset.hash,
                    asset.duration / 1_000_000_000,
                    asset.has_video,
                    asset.has_audio
                );
                session.request_previews(&asset);
                assets.push(asset);
            }
            Err(err) => eprintln!("{arg}: {err}"),
        }
    }

    while !session.previews_idle() {
        session.poll_preview_events();
        std::thread::sleep(Duration::from_millis(50));
    }
    session.poll_preview_events();

    for asset in &assets {
        println!(
            "{}: {} thumbnails, {} waveform peaks",
            asset.hash,
            session.previews.thumbnail_count(&asset.hash),
            session
                .previews
                .peaks(&asset.hash)
                .map_or(0, <[f32]>::len)
        );
    }
}
