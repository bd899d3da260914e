use async_process::{Command, Stdio};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, info, warn};

use super::{Locator, ResolvedTrack, TrackResolver};
use crate::{
    config::Config,
    error::{PlaybackError, PlaybackResult},
};

/// Resolver basado en `yt-dlp`: un resultado, sin playlists, sin descarga.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    format: String,
    search_prefix: String,
    source_address: Option<String>,
}

/// Información extraída de yt-dlp (`--dump-single-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    /// Presente en búsquedas y playlists; las entradas no disponibles llegan como `null`
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            format: config.ytdlp_format.clone(),
            search_prefix: config.ytdlp_search_prefix.clone(),
            source_address: config.source_address.clone(),
        }
    }

    /// Las URLs van tal cual; el texto libre se convierte en búsqueda de un resultado
    fn query_for(&self, locator: &Locator) -> String {
        if locator.is_url() {
            locator.as_str().to_string()
        } else {
            format!("{}:{}", self.search_prefix, locator.as_str())
        }
    }

    fn build_args(&self, locator: &Locator) -> Vec<String> {
        let mut args: Vec<String> = [
            "--dump-single-json",
            "--no-playlist",
            "--no-check-certificates",
            "--no-warnings",
            "--quiet",
            "-f",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.format.clone());

        if let Some(address) = &self.source_address {
            args.push("--source-address".to_string());
            args.push(address.clone());
        }

        // `--` para que una búsqueda que empiece por "-" no se lea como opción
        args.push("--".to_string());
        args.push(self.query_for(locator));
        args
    }

    /// Convierte la salida JSON de yt-dlp en un [`ResolvedTrack`].
    ///
    /// Si el resultado trae `entries` (búsqueda o playlist) se toma siempre la
    /// primera entrada.
    fn parse_output(locator: &Locator, stdout: &str) -> PlaybackResult<ResolvedTrack> {
        let info: YtDlpInfo = serde_json::from_str(stdout.trim()).map_err(|e| {
            PlaybackError::Resolution(format!("respuesta de yt-dlp inválida: {}", e))
        })?;

        let info = match info.entries {
            Some(entries) => entries.into_iter().next().flatten().ok_or_else(|| {
                PlaybackError::Resolution(format!("no se encontraron resultados para: {}", locator))
            })?,
            None => info,
        };

        let stream_url = info
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                PlaybackError::Resolution("yt-dlp no devolvió una URL de stream".to_string())
            })?;

        let title = info
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| locator.to_string());

        let mut track = ResolvedTrack::new(title, stream_url).with_http_headers(info.http_headers);

        if let Some(page_url) = info.webpage_url {
            track = track.with_page_url(page_url);
        }

        // Negativa, NaN o fuera de rango: se ignora como si fuera `null`
        let duration = info
            .duration
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        if let Some(duration) = duration {
            track = track.with_duration(duration);
        }

        if let Some(thumbnail) = info.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        Ok(track)
    }

    /// Última línea útil de stderr (yt-dlp imprime "ERROR: ..." al final)
    fn error_message(stderr: &[u8]) -> String {
        let stderr = String::from_utf8_lossy(stderr);
        stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("yt-dlp terminó con error")
            .to_string()
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, locator: &Locator) -> PlaybackResult<ResolvedTrack> {
        info!("🔍 Resolviendo: {}", locator);

        let args = self.build_args(locator);
        debug!("yt-dlp {}", args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PlaybackError::Resolution(format!("no se pudo ejecutar {}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let message = Self::error_message(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", locator, message);
            return Err(PlaybackError::Resolution(message));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = Self::parse_output(locator, &stdout)?;
        info!("✅ Resuelto: {} -> {}", locator, track.title);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> YtDlpResolver {
        YtDlpResolver::new(&Config::default())
    }

    fn locator(raw: &str) -> Locator {
        Locator::parse(raw).unwrap()
    }

    #[test]
    fn test_search_text_uses_single_result_prefix() {
        let resolver = resolver();
        let args = resolver.build_args(&locator("lofi beats"));

        assert_eq!(args.last().map(String::as_str), Some("ytsearch1:lofi beats"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--dump-single-json".to_string()));
        assert!(args.contains(&"bestaudio/best".to_string()));

        let address = args.iter().position(|a| a == "--source-address").unwrap();
        assert_eq!(args[address + 1], "0.0.0.0");
    }

    #[test]
    fn test_urls_are_passed_through() {
        let args = resolver().build_args(&locator("https://youtu.be/dQw4w9WgXcQ"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_parse_single_video() {
        let json = r#"{
            "title": "Song A",
            "url": "https://rr1.googlevideo.com/audio",
            "webpage_url": "https://www.youtube.com/watch?v=a",
            "duration": 212.0,
            "thumbnail": "https://i.ytimg.com/a.jpg",
            "http_headers": {"User-Agent": "Mozilla/5.0"}
        }"#;

        let track = YtDlpResolver::parse_output(&locator("song a"), json).unwrap();
        assert_eq!(track.title, "Song A");
        assert_eq!(track.stream_url, "https://rr1.googlevideo.com/audio");
        assert_eq!(track.page_url.as_deref(), Some("https://www.youtube.com/watch?v=a"));
        assert_eq!(track.duration, Some(Duration::from_secs(212)));
        assert_eq!(track.http_headers.get("User-Agent").map(String::as_str), Some("Mozilla/5.0"));
    }

    #[test]
    fn test_parse_takes_first_entry() {
        let json = r#"{
            "_type": "playlist",
            "entries": [
                {"title": "First", "url": "https://cdn/first"},
                {"title": "Second", "url": "https://cdn/second"}
            ]
        }"#;

        let track = YtDlpResolver::parse_output(&locator("query"), json).unwrap();
        assert_eq!(track.title, "First");
        assert_eq!(track.stream_url, "https://cdn/first");
    }

    #[test]
    fn test_parse_failures_are_resolution_errors() {
        let empty = r#"{"_type": "playlist", "entries": []}"#;
        assert!(matches!(
            YtDlpResolver::parse_output(&locator("nothing"), empty),
            Err(PlaybackError::Resolution(_))
        ));

        let unavailable = r#"{"entries": [null, {"title": "x", "url": "https://cdn/x"}]}"#;
        assert!(matches!(
            YtDlpResolver::parse_output(&locator("gone"), unavailable),
            Err(PlaybackError::Resolution(_))
        ));

        let no_url = r#"{"title": "Metadata only"}"#;
        assert!(matches!(
            YtDlpResolver::parse_output(&locator("meta"), no_url),
            Err(PlaybackError::Resolution(_))
        ));

        assert!(matches!(
            YtDlpResolver::parse_output(&locator("garbage"), "not json"),
            Err(PlaybackError::Resolution(_))
        ));
    }

    #[test]
    fn test_missing_title_falls_back_to_locator() {
        let json = r#"{"url": "https://cdn/raw.mp3", "duration": null}"#;
        let track = YtDlpResolver::parse_output(&locator("https://cdn/raw.mp3"), json).unwrap();
        assert_eq!(track.title, "https://cdn/raw.mp3");
        assert_eq!(track.duration, None);
    }

    #[test]
    fn test_parse_ignores_out_of_range_duration() {
        for duration in ["1e300", "-5.0", "0"] {
            let json = format!(r#"{{"title": "Huge", "url": "https://cdn/huge", "duration": {}}}"#, duration);
            let track = YtDlpResolver::parse_output(&locator("huge"), &json).unwrap();
            assert_eq!(track.title, "Huge");
            assert_eq!(track.duration, None);
        }
    }

    #[test]
    fn test_error_message_uses_last_line() {
        let stderr = b"WARNING: something\nERROR: [youtube] abc: Video unavailable\n\n";
        assert_eq!(
            YtDlpResolver::error_message(stderr),
            "ERROR: [youtube] abc: Video unavailable"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_resolution_error() {
        let mut resolver = resolver();
        resolver.binary = "/nonexistent/yt-dlp".to_string();

        let result = resolver.resolve(&locator("anything")).await;
        assert!(matches!(result, Err(PlaybackError::Resolution(_))));
    }
}
