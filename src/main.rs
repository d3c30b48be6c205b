use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use inquire::Select;
use std::{fmt, path::Path, time::Duration};
use subpair::{
    align::{self, AlignmentRow},
    bangumi::{BangumiClient, Candidate, SeriesSearch},
    episode::{self, Matcher, PRESETS},
    infer::{self, DEFAULT_DELAY, InferMode},
    llm::{Classifier, LlmClient},
    logging,
    merge::{self, RecognitionResult, RecognitionStore},
    plan::{self, RenamePlan, SUFFIX_PRESETS},
    rename::{self, FsRenamer, RenameReport, Renamer},
    settings::{Settings, SettingsStore},
    video::{self, FileInfo},
};
use tabled::{Table, Tabled, settings::Style};

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rename subtitles after the videos they share an episode number with
    Rename {
        /// Files to pair, or directories with --dir
        #[arg(required = true)]
        paths: Vec<String>,
        /// Language suffix inserted before the subtitle extension; none by default
        #[arg(long)]
        suffix: Option<String>,
        /// Preset language suffix, used when --suffix is empty
        #[arg(long, value_parser = SUFFIX_PRESETS)]
        lang: Option<String>,
        /// Episode pattern; group 1 captures the episode number
        #[arg(long, conflicts_with = "preset")]
        regex: Option<String>,
        /// Named episode pattern, see `settings presets`
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        dry_run: bool,
        /// Treat paths as directories and import their contents
        #[arg(long)]
        dir: bool,
    },
    /// Recognise the series in a directory and preview normalized names
    Identify {
        dir: String,
        /// Infer the title from a single model call
        #[arg(long)]
        batch: bool,
        /// Maximum number of search candidates
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        model_url: Option<String>,
        #[arg(long)]
        model_name: Option<String>,
    },
    /// Inspect or change the saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    SetRegex {
        pattern: String,
    },
    SetModel {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List the named episode patterns
    Presets,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Tabled)]
struct AlignmentLine {
    #[tabled(rename = "Episode")]
    episode: String,
    #[tabled(rename = "Video")]
    video: String,
    #[tabled(rename = "Subtitle")]
    subtitle: String,
}

impl From<&AlignmentRow> for AlignmentLine {
    fn from(row: &AlignmentRow) -> Self {
        let name = |file: &Option<FileInfo>| {
            file.as_ref()
                .map(|f| f.name.clone())
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            episode: row.episode.clone(),
            video: name(&row.video),
            subtitle: name(&row.subtitle),
        }
    }
}

#[derive(Tabled)]
struct RecognitionLine {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Episode")]
    episode: String,
    #[tabled(rename = "New name")]
    preview: String,
}

impl From<&RecognitionResult> for RecognitionLine {
    fn from(result: &RecognitionResult) -> Self {
        let episode = result
            .info
            .as_ref()
            .map(|info| info.episode.to_string())
            .unwrap_or_default();
        let preview = match (&result.error, merge::rename_preview(result)) {
            (Some(err), _) => format!("error: {}", err),
            (None, Some(name)) => name,
            (None, None) => "-".to_string(),
        };
        Self {
            file: result.file.name.clone(),
            episode,
            preview,
        }
    }
}

struct Choice(Candidate);

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let candidate = &self.0;
        write!(f, "{}", candidate.display_name())?;
        if candidate.display_name() != candidate.name {
            write!(f, " / {}", candidate.name)?;
        }
        if let Some(date) = &candidate.date {
            write!(f, " ({})", date)?;
        }
        Ok(())
    }
}

fn print_wrapped(message: &str) {
    println!("{}", textwrap::fill(message, textwrap::termwidth()));
}

/// `--regex` beats `--preset`, which beats the saved pattern. A bad saved
/// pattern falls back to the default with a warning; a bad flag is an error.
fn resolve_matcher(
    regex: Option<&str>,
    preset: Option<&str>,
    settings: &Settings,
) -> Result<Matcher> {
    if let Some(regex) = regex {
        return Matcher::compile(regex).context("Invalid --regex");
    }
    if let Some(label) = preset {
        let Some(pattern) = episode::preset(label) else {
            bail!("Unknown preset {:?}, see `subpair settings presets`", label);
        };
        return Ok(Matcher::compile(pattern)?);
    }
    let (matcher, err) = settings.matcher();
    if let Some(err) = err {
        println!(
            "{} {}, using {}",
            "warning:".yellow().bold(),
            err,
            matcher.as_str()
        );
    }
    Ok(matcher)
}

/// No suffix unless one is asked for.
fn resolve_suffix(custom: Option<&str>, lang: Option<&str>) -> String {
    plan::resolve_suffix(custom.unwrap_or(""), lang.unwrap_or(""))
}

fn collect_files(paths: &[String], dir: bool, matcher: &Matcher) -> Result<Vec<FileInfo>> {
    if !dir {
        return Ok(video::merge(&[], &video::classify(paths)));
    }
    let mut files = Vec::new();
    for path in paths {
        let listed = video::list_directory(Path::new(path))?;
        files = video::merge(&files, &video::import_directory(listed, matcher));
    }
    Ok(files)
}

fn pair<R: Renamer + ?Sized>(
    files: Vec<FileInfo>,
    matcher: &Matcher,
    suffix: &str,
    renamer: &R,
    dry_run: bool,
) -> Result<Option<RenameReport>> {
    let (videos, subtitles) = video::partition(files);
    let rows = align::align(&videos, &subtitles, matcher);
    if rows.is_empty() {
        println!("No files matched {}", matcher.as_str().bold());
        return Ok(None);
    }
    println!(
        "{}",
        Table::new(rows.iter().map(AlignmentLine::from)).with(Style::rounded())
    );

    let orphans = align::orphans(&rows);
    if !orphans.is_empty() {
        println!(
            "{} subtitles without a video: {}",
            "note:".cyan(),
            orphans.join(", ")
        );
    }
    let missing = align::missing(&rows);
    if !missing.is_empty() {
        println!(
            "{} videos without a subtitle: {}",
            "note:".cyan(),
            missing.join(", ")
        );
    }

    let renames: RenamePlan = plan::plan(&rows, suffix)?;
    if renames.is_empty() {
        println!("Nothing to rename");
        return Ok(None);
    }
    for entry in &renames.entries {
        println!(
            "{} {} {}",
            episode::file_name(&entry.source_path),
            "->".dimmed(),
            entry.target_name.green()
        );
    }

    if dry_run {
        println!("{}", "Dry run, nothing renamed".yellow());
        return Ok(None);
    }

    let report = rename::execute(&renames.entries, renamer);
    if report.success {
        report.verify(renames.entries.len())?;
        println!("{}", report.message.green().bold());
    } else {
        print_wrapped(&report.message.red().to_string());
    }
    Ok(Some(report))
}

fn choose(candidates: Vec<Candidate>) -> Result<Candidate> {
    if candidates.len() == 1 {
        return candidates.into_iter().next().context("No candidates");
    }
    let choices = candidates.into_iter().map(Choice).collect();
    let choice = Select::new("Which series is this?", choices)
        .prompt()
        .context("No series selected")?;
    Ok(choice.0)
}

async fn identify<C, S, F>(
    files: &[FileInfo],
    classifier: &C,
    search: &S,
    mode: InferMode,
    limit: Option<usize>,
    delay: Duration,
    pick: F,
) -> Result<Vec<RecognitionResult>>
where
    C: Classifier + ?Sized,
    S: SeriesSearch + ?Sized,
    F: FnOnce(Vec<Candidate>) -> Result<Candidate>,
{
    let guess = infer::infer(files, classifier, mode, delay).await?;
    println!(
        "Recognised {} ({:.0}% confidence)",
        guess.title.bold(),
        guess.confidence * 100.0
    );

    let candidates = search.search(&guess.title, limit).await?;
    if candidates.is_empty() {
        bail!("No series found for {:?}", guess.title);
    }
    let candidate = pick(candidates)?;
    let detail = search.detail(candidate.id).await?;
    println!(
        "Using {}{}",
        detail.display_title().bold(),
        detail
            .episodes
            .map(|n| format!(", {} episodes", n))
            .unwrap_or_default()
    );

    let mut store = RecognitionStore::new();
    let results = merge::apply(&detail, files, classifier, &mut store, delay).await;
    println!(
        "{}",
        Table::new(results.iter().map(RecognitionLine::from)).with(Style::rounded())
    );
    Ok(results)
}

fn settings_command(store: &SettingsStore, action: SettingsAction) -> Result<()> {
    let _watch = store.subscribe(|s| tracing::debug!("Settings changed: {:?}", s));

    match action {
        SettingsAction::Show => {
            let settings = store.load()?;
            println!("{}", store.path().display().to_string().dimmed());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::SetRegex { pattern } => {
            Matcher::compile(&pattern).context("Pattern not saved")?;
            let settings = Settings {
                episode_regex: pattern,
                ..store.load()?
            };
            store.save(&settings)?;
            println!("{} {}", "Saved".green(), settings.episode_regex);
        }
        SettingsAction::SetModel { url, name } => {
            if url.is_none() && name.is_none() {
                bail!("Pass --url and/or --name");
            }
            let mut settings = store.load()?;
            if let Some(url) = url {
                settings.model_url = url;
            }
            if let Some(name) = name {
                settings.model_name = name;
            }
            store.save(&settings)?;
            println!(
                "{} {} at {}",
                "Saved".green(),
                settings.model_name,
                settings.model_url
            );
        }
        SettingsAction::Presets => {
            for (label, pattern) in PRESETS {
                println!("{:<10} {}", label.bold(), pattern);
            }
            println!("suffixes: {}", SUFFIX_PRESETS.join(", "));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logging::init(args.verbose);

    let store = SettingsStore::open_default()?;

    match args.command {
        Commands::Rename {
            paths,
            suffix,
            lang,
            regex,
            preset,
            dry_run,
            dir,
        } => {
            let settings = store.load()?.with_env();
            let matcher = resolve_matcher(regex.as_deref(), preset.as_deref(), &settings)?;
            let suffix = resolve_suffix(suffix.as_deref(), lang.as_deref());
            let files = collect_files(&paths, dir, &matcher)?;
            let report = pair(files, &matcher, &suffix, &FsRenamer, dry_run)?;
            if report.is_some_and(|r| !r.success) {
                bail!("Rename stopped early");
            }
            Ok(())
        }
        Commands::Identify {
            dir,
            batch,
            limit,
            model_url,
            model_name,
        } => {
            let settings = store.load()?.with_env();
            let classifier = LlmClient::new(
                model_url.as_deref().unwrap_or(&settings.model_url),
                model_name.as_deref().unwrap_or(&settings.model_name),
            )?;
            let search = BangumiClient::new()?;
            let files = video::list_directory(Path::new(&dir))?;
            let mode = if batch {
                InferMode::Batch
            } else {
                InferMode::PerFile
            };
            identify(&files, &classifier, &search, mode, limit, DEFAULT_DELAY, choose).await?;
            Ok(())
        }
        Commands::Settings { action } => settings_command(&store, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{BoxFuture, FutureExt};
    use std::fs;
    use subpair::{
        Error,
        bangumi::SeriesDetail,
        llm::{AnimeInfo, TitleGuess},
    };
    use tempfile::TempDir;

    fn create_test_files(dir: &Path, files: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for file in files {
            fs::File::create(dir.join(file)).unwrap();
        }
    }

    fn test_files() -> Vec<&'static str> {
        vec![
            "[Group] Show [01][1080p].mkv",
            "[Group] Show [02][1080p].mkv",
            "[Group] Show [03][1080p].mkv",
            "Show.[01].ass",
            "Show.[02].ass",
            "Show.[04].ass",
            "notes.txt.bak",
        ]
    }

    fn default_matcher() -> Matcher {
        Matcher::default()
    }

    #[test]
    fn test_pair_rename_inplace() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        create_test_files(&source, &test_files());

        let files = collect_files(
            &[source.to_string_lossy().to_string()],
            true,
            &default_matcher(),
        )
        .unwrap();
        let report = pair(files, &default_matcher(), "chs", &FsRenamer, false)
            .unwrap()
            .unwrap();

        assert!(report.success, "rename should succeed: {}", report.message);
        for expected_file in [
            "[Group] Show [01][1080p].chs.ass",
            "[Group] Show [02][1080p].chs.ass",
        ] {
            assert!(
                source.join(expected_file).exists(),
                "Renamed file should exist: {:?}",
                expected_file
            );
        }
        for untouched in ["Show.[01].ass", "Show.[02].ass"] {
            assert!(!source.join(untouched).exists());
        }
        // Subtitle 04 has no video, so the directory import never picked it up.
        assert!(source.join("Show.[04].ass").exists());
        assert!(source.join("notes.txt.bak").exists());
    }

    #[test]
    fn test_pair_dry_run() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        create_test_files(&source, &test_files());

        let paths: Vec<String> = test_files()
            .iter()
            .map(|f| source.join(f).to_string_lossy().to_string())
            .collect();
        let files = collect_files(&paths, false, &default_matcher()).unwrap();
        let report = pair(files, &default_matcher(), "chs", &FsRenamer, true).unwrap();

        assert!(report.is_none());
        for file_name in test_files() {
            assert!(
                source.join(file_name).exists(),
                "Dry run should not touch {:?}",
                file_name
            );
        }
    }

    #[test]
    fn test_pair_reports_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        create_test_files(&source, &test_files());
        // Occupy the second target so the rename stops there.
        fs::File::create(source.join("[Group] Show [02][1080p].chs.ass")).unwrap();

        let paths: Vec<String> = test_files()
            .iter()
            .map(|f| source.join(f).to_string_lossy().to_string())
            .collect();
        let files = collect_files(&paths, false, &default_matcher()).unwrap();
        let report = pair(files, &default_matcher(), "chs", &FsRenamer, false)
            .unwrap()
            .unwrap();

        assert!(!report.success);
        assert!(report.message.contains("not rolled back"));
        assert_eq!(report.renamed_names, vec!["[Group] Show [01][1080p].chs.ass"]);
        assert!(source.join("Show.[02].ass").exists());
    }

    #[test]
    fn test_pair_without_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        create_test_files(&source, &["Show [01].mkv", "sub [01].srt"]);

        let files = collect_files(
            &[source.to_string_lossy().to_string()],
            true,
            &default_matcher(),
        )
        .unwrap();
        let suffix = resolve_suffix(None, None);
        let report = pair(files, &default_matcher(), &suffix, &FsRenamer, false)
            .unwrap()
            .unwrap();

        assert!(report.success, "{}", report.message);
        assert!(source.join("Show [01].srt").exists());
        assert!(!source.join("sub [01].srt").exists());
    }

    #[test]
    fn test_pair_rerun_after_partial_rename() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        create_test_files(
            &source,
            &["A [01].mkv", "A [02].mkv", "A [01].chs.srt", "x [02].srt"],
        );

        let files = collect_files(
            &[source.to_string_lossy().to_string()],
            true,
            &default_matcher(),
        )
        .unwrap();
        let report = pair(files, &default_matcher(), "chs", &FsRenamer, false)
            .unwrap()
            .unwrap();

        assert!(report.success, "{}", report.message);
        assert_eq!(report.renamed_names, vec!["A [01].chs.srt", "A [02].chs.srt"]);
        assert!(source.join("A [01].chs.srt").exists());
        assert!(source.join("A [02].chs.srt").exists());
        assert!(!source.join("x [02].srt").exists());
    }

    #[test]
    fn test_resolve_suffix_flags() {
        assert_eq!(resolve_suffix(None, None), "");
        assert_eq!(resolve_suffix(Some(""), None), "");
        assert_eq!(resolve_suffix(None, Some("cht")), "cht");
        assert_eq!(resolve_suffix(Some(" jp "), Some("chs")), "jp");
    }

    #[test]
    fn test_lang_flag_accepts_presets_only() {
        let args = Args::try_parse_from(["subpair", "rename", "--lang", "cht", "a.mkv"]).unwrap();
        match args.command {
            Commands::Rename { suffix, lang, .. } => {
                assert_eq!(suffix, None);
                assert_eq!(lang.as_deref(), Some("cht"));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Args::try_parse_from(["subpair", "rename", "--lang", "jp", "a.mkv"]).is_err());
    }

    #[test]
    fn test_resolve_matcher_precedence() {
        let settings = Settings::default();
        let m = resolve_matcher(Some(r"E(\d+)"), None, &settings).unwrap();
        assert_eq!(m.as_str(), r"E(\d+)");

        let m = resolve_matcher(None, Some("sxxeyy"), &settings).unwrap();
        assert_eq!(m.as_str(), r"S[0-9]{1,2}E([0-9]{2})");

        let m = resolve_matcher(None, None, &settings).unwrap();
        assert_eq!(m.as_str(), settings.episode_regex);

        assert!(resolve_matcher(Some(r"\d+"), None, &settings).is_err());
        assert!(resolve_matcher(None, Some("nope"), &settings).is_err());
    }

    #[test]
    fn test_choice_display() {
        let choice = Choice(Candidate {
            id: 1,
            name: "Sousou no Frieren".to_string(),
            name_cn: Some("葬送的芙莉莲".to_string()),
            subject_type: Some(2),
            date: Some("2023-09-29".to_string()),
        });
        assert_eq!(
            choice.to_string(),
            "葬送的芙莉莲 / Sousou no Frieren (2023-09-29)"
        );
    }

    #[test]
    fn test_settings_set_regex_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::open(temp_dir.path().join("settings.json"));

        let result = settings_command(
            &store,
            SettingsAction::SetRegex {
                pattern: r"\d+".to_string(),
            },
        );
        assert!(result.is_err());
        assert!(!store.path().exists());

        settings_command(
            &store,
            SettingsAction::SetRegex {
                pattern: r"第(\d{2})集".to_string(),
            },
        )
        .unwrap();
        assert_eq!(store.load().unwrap().episode_regex, r"第(\d{2})集");
    }

    struct FakeClassifier;

    impl Classifier for FakeClassifier {
        fn classify<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, subpair::Result<AnimeInfo>> {
            let episode = Matcher::default()
                .extract(filename)
                .and_then(|key| key.parse().ok())
                .unwrap_or(0);
            async move {
                Ok(AnimeInfo {
                    title: "Show".to_string(),
                    season: 1,
                    episode,
                    confidence: 0.8,
                    ..Default::default()
                })
            }
            .boxed()
        }

        fn classify_batch<'a>(
            &'a self,
            _: &'a [String],
        ) -> BoxFuture<'a, subpair::Result<TitleGuess>> {
            async { Err(Error::Classifier("unused".to_string())) }.boxed()
        }
    }

    struct FakeSearch;

    impl SeriesSearch for FakeSearch {
        fn search<'a>(
            &'a self,
            query: &'a str,
            _: Option<usize>,
        ) -> BoxFuture<'a, subpair::Result<Vec<Candidate>>> {
            let found = vec![Candidate {
                id: 9,
                name: query.to_string(),
                name_cn: None,
                subject_type: Some(2),
                date: None,
            }];
            async move { Ok(found) }.boxed()
        }

        fn detail(&self, id: i64) -> BoxFuture<'_, subpair::Result<SeriesDetail>> {
            async move {
                Ok(SeriesDetail {
                    id,
                    name: "The Show".to_string(),
                    name_cn: None,
                    cover_url: None,
                    episodes: Some(2),
                    year: Some(2024),
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_identify_with_fakes() {
        let files = video::classify(&["/d/Show [01].mkv", "/d/Show [02].mkv", "/d/Show [01].ass"]);
        let results = identify(
            &files,
            &FakeClassifier,
            &FakeSearch,
            InferMode::PerFile,
            None,
            Duration::ZERO,
            |mut candidates| Ok(candidates.remove(0)),
        )
        .await
        .unwrap();

        let previews: Vec<String> = results.iter().filter_map(merge::rename_preview).collect();
        assert_eq!(
            previews,
            vec!["The Show S01E01.mkv", "The Show S01E02.mkv"]
        );
    }
}
