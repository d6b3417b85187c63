//! Typed engine parameters and the three-layer merge.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tubeflow_models::{DownloadOptions, OutputTemplate};

/// Parameters handed to the engine for one call.
///
/// Every field is optional so that partially specified layers can be
/// merged; `None` means "not set at this layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Number of retries for HTTP errors.
    pub retries: Option<u32>,
    /// Number of retries for a fragment.
    pub fragment_retries: Option<u32>,
    /// Number of retries for known extractor errors.
    pub extractor_retries: Option<u32>,
    /// Number of retries on file access errors.
    pub file_access_retries: Option<u32>,
    /// Time to wait before giving up, in seconds.
    pub socket_timeout: Option<f64>,
    /// Maximum download rate in bytes per second.
    pub ratelimit: Option<u64>,
    pub concurrent_fragment_downloads: Option<u32>,
    pub proxy: Option<String>,
    /// Netscape cookies file.
    pub cookiefile: Option<PathBuf>,

    /// Request-safe options, also settable by process-wide layers.
    #[serde(flatten)]
    pub options: DownloadOptions,

    /// Raw arguments passed through to the engine unchanged, e.g.
    /// `["--extractor-args", "youtube:player_client=web"]`.
    pub extra: Vec<String>,
}

/// Keys of [`EngineParams`] that are not [`DownloadOptions`] fields.
pub const ENGINE_FIELDS: [&str; 10] = [
    "retries",
    "fragment_retries",
    "extractor_retries",
    "file_access_retries",
    "socket_timeout",
    "ratelimit",
    "concurrent_fragment_downloads",
    "proxy",
    "cookiefile",
    "extra",
];

macro_rules! overlay {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

fn overlay_options(dst: &mut DownloadOptions, src: &DownloadOptions) {
    overlay!(dst, src;
        format, allow_unplayable_formats, format_sort, format_sort_force,
        outtmpl, outtmpl_na_placeholder, restrictfilenames, windowsfilenames, trim_file_name,
        updatetime, writedescription, writeinfojson, allow_playlist_files, clean_infojson,
        getcomments, writethumbnail, write_all_thumbnails, writelink, writeurllink,
        writewebloclink, writedesktoplink,
        writesubtitles, writeautomaticsub, subtitlesformat, subtitleslangs,
        matchtitle, rejecttitle, prefer_free_formats, keepvideo,
        min_filesize, max_filesize, min_views, max_views,
        useid,
    );
}

impl EngineParams {
    /// Merge `defaults < request < overrides`, field by field.
    ///
    /// A field set at a later layer replaces the earlier value. Pass-through
    /// arguments are concatenated so override arguments come last.
    pub fn merge(
        defaults: &EngineParams,
        request: Option<&DownloadOptions>,
        overrides: &EngineParams,
    ) -> EngineParams {
        let mut merged = defaults.clone();

        if let Some(request) = request {
            overlay_options(&mut merged.options, request);
        }

        overlay!(merged, overrides;
            retries, fragment_retries, extractor_retries, file_access_retries,
            socket_timeout, ratelimit, concurrent_fragment_downloads, proxy, cookiefile,
        );
        overlay_options(&mut merged.options, &overrides.options);
        merged.extra.extend(overrides.extra.iter().cloned());

        merged
    }

    /// Render as yt-dlp command-line arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = ArgList::default();
        let o = &self.options;

        args.value("--retries", self.retries);
        args.value("--fragment-retries", self.fragment_retries);
        args.value("--extractor-retries", self.extractor_retries);
        args.value("--file-access-retries", self.file_access_retries);
        args.value("--socket-timeout", self.socket_timeout);
        args.value("--limit-rate", self.ratelimit);
        args.value("--concurrent-fragments", self.concurrent_fragment_downloads);
        args.value("--proxy", self.proxy.as_deref());
        args.value(
            "--cookies",
            self.cookiefile.as_ref().map(|p| p.to_string_lossy().into_owned()),
        );

        args.value("--format", o.format.as_deref());
        args.switch(o.allow_unplayable_formats, "--allow-unplayable-formats", Some("--no-allow-unplayable-formats"));
        args.value("--format-sort", o.format_sort.as_ref().map(|fields| fields.join(",")));
        args.switch(o.format_sort_force, "--format-sort-force", Some("--no-format-sort-force"));

        match &o.outtmpl {
            Some(OutputTemplate::Single(template)) => args.value("--output", Some(template.as_str())),
            Some(OutputTemplate::Named(templates)) => {
                for (kind, template) in templates {
                    let value = if kind == "default" {
                        template.to_string()
                    } else {
                        format!("{kind}:{template}")
                    };
                    args.value("--output", Some(value));
                }
            }
            None if o.useid == Some(true) => args.value("--output", Some("%(id)s.%(ext)s")),
            None => {}
        }
        args.value("--output-na-placeholder", o.outtmpl_na_placeholder.as_deref());
        args.switch(o.restrictfilenames, "--restrict-filenames", Some("--no-restrict-filenames"));
        args.switch(o.windowsfilenames, "--windows-filenames", Some("--no-windows-filenames"));
        args.value("--trim-filenames", o.trim_file_name);

        args.switch(o.updatetime, "--mtime", Some("--no-mtime"));
        args.switch(o.writedescription, "--write-description", Some("--no-write-description"));
        args.switch(o.writeinfojson, "--write-info-json", Some("--no-write-info-json"));
        args.switch(o.allow_playlist_files, "--write-playlist-metafiles", Some("--no-write-playlist-metafiles"));
        args.switch(o.clean_infojson, "--clean-info-json", Some("--no-clean-info-json"));
        args.switch(o.getcomments, "--write-comments", Some("--no-write-comments"));
        args.switch(o.writethumbnail, "--write-thumbnail", Some("--no-write-thumbnail"));
        args.switch(o.write_all_thumbnails, "--write-all-thumbnails", None);
        args.switch(o.writelink, "--write-link", None);
        args.switch(o.writeurllink, "--write-url-link", None);
        args.switch(o.writewebloclink, "--write-webloc-link", None);
        args.switch(o.writedesktoplink, "--write-desktop-link", None);

        args.switch(o.writesubtitles, "--write-subs", Some("--no-write-subs"));
        args.switch(o.writeautomaticsub, "--write-auto-subs", Some("--no-write-auto-subs"));
        args.value("--sub-format", o.subtitlesformat.as_deref());
        args.value("--sub-langs", o.subtitleslangs.as_ref().map(|langs| langs.join(",")));

        args.value("--match-title", o.matchtitle.as_deref());
        args.value("--reject-title", o.rejecttitle.as_deref());
        args.switch(o.prefer_free_formats, "--prefer-free-formats", Some("--no-prefer-free-formats"));
        args.switch(o.keepvideo, "--keep-video", Some("--no-keep-video"));
        args.value("--min-filesize", o.min_filesize);
        args.value("--max-filesize", o.max_filesize);

        // Multiple --match-filters are OR'ed, so the view bounds share one.
        let views: Vec<String> = [
            o.min_views.map(|n| format!("view_count >=? {n}")),
            o.max_views.map(|n| format!("view_count <=? {n}")),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !views.is_empty() {
            args.value("--match-filters", Some(views.join(" & ")));
        }

        args.0.extend(self.extra.iter().cloned());
        args.0
    }
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn value<V: ToString>(&mut self, flag: &str, value: Option<V>) {
        if let Some(value) = value {
            self.0.push(flag.to_string());
            self.0.push(value.to_string());
        }
    }

    fn switch(&mut self, value: Option<bool>, on: &str, off: Option<&str>) {
        match (value, off) {
            (Some(true), _) => self.0.push(on.to_string()),
            (Some(false), Some(off)) => self.0.push(off.to_string()),
            _ => {}
        }
    }
}
