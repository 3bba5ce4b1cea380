//! Export of harvested submissions to DSpace Simple Archive Format.
//!
//! Every exported item ends up as a folder
//!
//! ```text
//! <export_path>/<urlPath>/publication_id_<P>/submission_file_id_<F>/
//!     dublin_core.xml          dc.* fields
//!     metadata_<schema>.xml    one file per further schema, e.g. local.*
//!     contents                 payload file names, one per line
//!     collections              target collection handle
//!     <payload files>
//! ```
//!
//! which [`ExportSaf::write_zips`] turns into
//! `<export_path>/<urlPath>_publication_id_<P>_submission_file_id_<F>.zip`. The zip names double
//! as the record of what has been exported, see [`crate::parse_item_name`].
//!
//! Metadata comes from the `[[meta]]` table: each entry's [expression](crate::expr) is evaluated
//! against the submission, run through the [filter chain](crate::filters) and flattened into
//! one or more `<dcvalue>` elements. Per-locale dictionaries resolve to the submission locale and
//! carry a `language` attribute with the ISO 639-2 code.

use std::{
  collections::HashMap,
  fs::File,
  io::{BufWriter, Write},
};

use quick_xml::{
  events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
  Writer,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use super::*;
use crate::{
  expr::{self, Expr, Scope},
  filters::FilterChain,
};

lazy_static! {
  /// Keys of per-locale dictionaries such as `de_DE`, `en`, `pt-BR` or `sr@cyrillic`.
  static ref LOCALE_KEY: Regex =
    Regex::new(r"^[a-z]{2,3}([_-][A-Za-z]{2,4})?(@[a-z]+)?$").expect("valid locale regex");

  /// ISO 639-1 codes whose ISO 639-2 bibliographic code differs from the terminology code.
  static ref BIBLIOGRAPHIC: HashMap<&'static str, &'static str> = HashMap::from([
    ("bo", "tib"), ("cs", "cze"), ("cy", "wel"), ("de", "ger"), ("el", "gre"),
    ("eu", "baq"), ("fa", "per"), ("fr", "fre"), ("hy", "arm"), ("is", "ice"),
    ("ka", "geo"), ("mi", "mao"), ("mk", "mac"), ("ms", "may"), ("my", "bur"),
    ("nl", "dut"), ("ro", "rum"), ("sk", "slo"), ("sq", "alb"), ("zh", "chi"),
  ]);
}

/// Converts a PKP locale like `de_DE` into an ISO 639-2 bibliographic language code (`ger`).
///
/// Unknown languages return their two-letter prefix unchanged.
///
/// # Examples
///
/// ```
/// use journal2saf::saf::locale_to_isolang;
///
/// assert_eq!(locale_to_isolang("de_DE"), "ger");
/// assert_eq!(locale_to_isolang("en_US"), "eng");
/// assert_eq!(locale_to_isolang("es"), "spa");
/// ```
pub fn locale_to_isolang(locale: &str) -> String {
  let code: String = locale.chars().take(2).collect::<String>().to_lowercase();
  if let Some(bibliographic) = BIBLIOGRAPHIC.get(code.as_str()) {
    return bibliographic.to_string();
  }
  match isolang::Language::from_639_1(&code) {
    Some(language) => language.to_639_3().to_string(),
    None => {
      warn!("unknown language code in locale {locale}");
      code
    },
  }
}

/// Reduces an HTML fragment to its text content.
pub fn html_to_text(html: &str) -> String {
  scraper::Html::parse_fragment(html).root_element().text().collect::<String>().trim().to_string()
}

/// Removes ASCII punctuation (except `.`) and spaces from a file name.
pub fn clean_filename(filename: &str) -> String {
  filename.chars().filter(|c| *c == '.' || !(c.is_ascii_punctuation() || *c == ' ')).collect()
}

/// Extracts the file name from a `Content-Disposition` header.
pub fn filename_from_disposition(header: &str) -> Option<String> {
  let start = header.find("filename=")? + "filename=".len();
  let rest = &header[start..];
  let name = match rest.strip_prefix('"') {
    Some(quoted) => quoted.split('"').next()?,
    None => rest.split(';').next()?.trim(),
  };
  (!name.is_empty()).then(|| name.to_string())
}

/// File extension (with leading dot) for a mimetype, empty if unknown.
pub fn extension_for(mimetype: &str) -> String {
  match mimetype {
    // mime_guess lists `htm` first
    "text/html" => ".html".to_string(),
    _ => mime_guess::get_mime_extensions_str(mimetype)
      .and_then(|extensions| extensions.first())
      .map(|extension| format!(".{extension}"))
      .unwrap_or_default(),
  }
}

/// A single `<dcvalue>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcValue {
  /// Element name, e.g. `title`
  pub element:   String,
  /// Qualifier, empty if the field has none
  pub qualifier: String,
  /// ISO 639-2 language of a localized value
  pub language:  Option<String>,
  /// Text content
  pub value:     String,
}

/// Target of a `[[meta]]` entry, split from `schema.element[.qualifier]`.
#[derive(Debug, Clone)]
struct MetaTarget {
  /// Full field name, as seen by filters
  field:     String,
  /// Metadata schema, `dc` for `dublin_core.xml`
  schema:    String,
  /// Element name
  element:   String,
  /// Qualifier, possibly empty
  qualifier: String,
}

impl MetaTarget {
  /// Splits a configured field name; missing parts are empty.
  fn parse(field: &str) -> Self {
    let mut parts = field.splitn(3, '.');
    let schema = parts.next().unwrap_or_default().to_string();
    let element = parts.next().unwrap_or_default().to_string();
    let qualifier = parts.next().unwrap_or_default().to_string();
    Self { field: field.to_string(), schema, element, qualifier }
  }

  /// A `<dcvalue>` for this target.
  fn value(&self, value: String, language: Option<String>) -> DcValue {
    DcValue {
      element: self.element.clone(),
      qualifier: self.qualifier.clone(),
      language,
      value,
    }
  }
}

/// Writes `dublin_core.xml` (schema `dc`) or `metadata_<schema>.xml` into `work_dir`.
pub fn write_xml_file(work_dir: &Path, values: &[DcValue], schema: &str) -> Result<PathBuf, SafError> {
  let name = if schema == "dc" { "dublin_core.xml".to_string() } else { format!("metadata_{schema}.xml") };
  std::fs::create_dir_all(work_dir)?;
  let path = work_dir.join(&name);
  debug!("write {name}");

  let mut writer = Writer::new_with_indent(BufWriter::new(File::create(&path)?), b' ', 2);
  writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
  let mut root = BytesStart::new("dublin_core");
  if schema != "dc" {
    root.push_attribute(("schema", schema));
  }
  writer.write_event(Event::Start(root))?;
  for value in values {
    let mut element = BytesStart::new("dcvalue");
    element.push_attribute(("element", value.element.as_str()));
    element.push_attribute(("qualifier", value.qualifier.as_str()));
    if let Some(language) = &value.language {
      element.push_attribute(("language", language.as_str()));
    }
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(&value.value)))?;
    writer.write_event(Event::End(BytesEnd::new("dcvalue")))?;
  }
  writer.write_event(Event::End(BytesEnd::new("dublin_core")))?;
  writer.into_inner().flush()?;
  Ok(path)
}

/// Writes the `contents` manifest listing the payload files.
pub fn write_contents_file(work_dir: &Path, files: &[String]) -> Result<(), SafError> {
  let content: String = files.iter().map(|file| format!("{file}\n")).collect();
  std::fs::write(work_dir.join("contents"), content)?;
  Ok(())
}

/// Writes the `collections` file holding the target collection handle.
pub fn write_collections_file(work_dir: &Path, collection: &str) -> Result<(), SafError> {
  std::fs::create_dir_all(work_dir)?;
  std::fs::write(work_dir.join("collections"), collection)?;
  Ok(())
}

/// Exports harvested submissions as SAF folders and zips them.
pub struct ExportSaf<'a> {
  /// Active configuration
  config:  &'a Config,
  /// Client used to download payload files
  client:  &'a JournalClient,
  /// Cleanup filters for evaluated metadata
  filters: FilterChain,
  /// Parsed `[[meta]]` entries in configuration order
  meta:    Vec<(MetaTarget, Expr)>,
}

impl<'a> ExportSaf<'a> {
  /// Prepares an export, parsing every metadata expression up front.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::Expression`] naming the field of the first expression that does not
  /// parse, or [`SafError::Config`] for unknown filters.
  pub fn new(config: &'a Config, client: &'a JournalClient) -> Result<Self, SafError> {
    let meta = config
      .meta
      .iter()
      .map(|meta| {
        let expr = Expr::parse(&meta.value)
          .map_err(|e| SafError::Expression(format!("{}: {e}", meta.field)))?;
        Ok((MetaTarget::parse(&meta.field), expr))
      })
      .collect::<Result<Vec<_>, SafError>>()?;
    Ok(Self { config, client, filters: FilterChain::from_config(config)?, meta })
  }

  /// Appends a custom filter after the configured ones.
  pub fn with_filter(mut self, filter: Box<dyn filters::MetadataFilter>) -> Self {
    self.filters.push(filter);
    self
  }

  /// Variables available to metadata expressions for `submission`.
  pub fn scope(&self, submission: &Submission, publisher: &Publisher) -> Scope {
    let locale = submission.locale();
    let (pagestart, pageend) = expr::split_pages(&submission.pages());
    let mut scope = Scope::default();
    scope.insert("submission", submission.data.clone());
    scope.insert("publication", submission.publication.clone());
    scope.insert("issue", submission.issue.clone().unwrap_or(Value::Null));
    scope.insert("context", publisher.data.clone());
    scope.insert("files", Value::Array(submission.pending_files().map(|f| f.data.clone()).collect()));
    scope.insert("language", Value::String(locale_to_isolang(&locale)));
    scope.insert("locale", Value::String(locale));
    scope.insert("pagestart", pagestart);
    scope.insert("pageend", pageend);
    scope.insert("type", Value::String(self.config.general.item_type.clone()));
    scope.insert("system", Value::String(self.config.general.system.to_string()));
    scope
  }

  /// Evaluates the metadata mapping for `submission`, grouped by schema.
  pub fn create_dc_values(
    &self,
    submission: &Submission,
    publisher: &Publisher,
    report: &mut Report,
  ) -> BTreeMap<String, Vec<DcValue>> {
    let scope = self.scope(submission, publisher);
    let locale = submission.locale();
    debug!("{} {locale}", publisher.url_path);

    let mut schemas: BTreeMap<String, Vec<DcValue>> = BTreeMap::new();
    for (target, expr) in &self.meta {
      let value = self.filters.apply(&target.field, expr.evaluate(&scope));
      let mut values = Vec::new();
      if target.field == "dc.contributor.author" && value.is_array() {
        values.extend(author_values(&value, &locale).into_iter().map(|name| target.value(name, None)));
      } else {
        flatten(target, &value, &locale, None, &mut values);
      }
      if values.is_empty() {
        warn!("no value for {}", target.field);
        report.add("WARNING: no value for meta", &target.field);
        continue;
      }
      schemas.entry(target.schema.clone()).or_default().extend(values);
    }
    schemas
  }

  /// Writes one XML file per schema for `submission` into `item_folder`.
  pub fn write_meta_file(
    &self,
    item_folder: &Path,
    submission: &Submission,
    publisher: &Publisher,
    report: &mut Report,
  ) -> Result<(), SafError> {
    for (schema, values) in self.create_dc_values(submission, publisher, report) {
      write_xml_file(item_folder, &values, &schema)?;
    }
    Ok(())
  }

  /// Download URL of a file record: `article/download` for OJS, `catalog/download` for OMP.
  fn download_url(&self, publisher: &Publisher, submission: &Submission, record: &FileRecord, file_id: &str) -> String {
    match self.config.general.system {
      System::Ojs => {
        let submission_id = model::json_text(&record.data["file"]["submissionId"])
          .unwrap_or_else(|| submission.id().to_string());
        format!("{}/article/download/{submission_id}/{}/{file_id}", publisher.url, record.id)
      },
      System::Omp => {
        let submission_id = model::json_text(&submission.publication["submissionId"])
          .unwrap_or_else(|| submission.id().to_string());
        format!("{}/catalog/download/{submission_id}/{}/{file_id}", publisher.url, record.id)
      },
    }
  }

  /// Downloads the payload of every record into `work_dir` and returns the file names.
  ///
  /// Failed downloads are logged and reported, and do not abort the export.
  pub async fn download_files(
    &self,
    publisher: &Publisher,
    work_dir: &Path,
    submission: &Submission,
    records: &[&FileRecord],
    report: &mut Report,
  ) -> Result<Vec<String>, SafError> {
    let system = self.config.general.system;
    let mut filenames: Vec<String> = Vec::new();
    for record in records {
      if !record.has_file(system) {
        warn!("no file in {} with publication_id {}", system.file_record_name(), record.publication_id);
        continue;
      }
      let Some(file_id) = record.submission_file_id.as_deref() else {
        warn!("{} {} has no submission file", system.file_record_name(), record.id);
        continue;
      };
      let url = self.download_url(publisher, submission, record, file_id);
      let download = self.client.download(&url).await?;
      if download.status != reqwest::StatusCode::OK {
        let code = download.status.as_u16();
        error!("error download file code:{code} {url}");
        report.add(format!("error download file code:{code}"), &url);
        continue;
      }

      let mimetype = record.mimetype().map(str::to_string).or(download.content_type.clone());
      let extension = mimetype.as_deref().map(extension_for).unwrap_or_default();
      let position = match system {
        System::Ojs => submission.volume(),
        System::Omp => submission.series_position(),
      };
      let mut filename = format!("{}_volume_{position}{extension}", publisher.url_path);
      if !self.config.export.generate_filename {
        match download.content_disposition.as_deref().and_then(filename_from_disposition) {
          Some(name) if !clean_filename(&name).is_empty() => filename = clean_filename(&name),
          _ => warn!("could not extract filename from {:?}", download.content_disposition),
        }
      }
      if filenames.contains(&filename) {
        filename = format!("{file_id}_{filename}");
      }

      let path = work_dir.join(&filename);
      std::fs::write(&path, &download.bytes)?;
      debug!("download file at {url} size: {}", human_size(download.bytes.len() as u64));
      filenames.push(filename);
    }
    Ok(filenames)
  }

  /// Writes a SAF folder for every submission with pending file records.
  ///
  /// Returns the item folders written.
  pub async fn export(
    &self,
    publishers: &[Publisher],
    report: &mut Report,
  ) -> Result<Vec<PathBuf>, SafError> {
    let system = self.config.general.system;
    let record_name = system.file_record_name();
    let mut items = Vec::new();
    for publisher in publishers {
      let context_name = &publisher.url_path;
      for submission in &publisher.submissions {
        let pending: Vec<&FileRecord> = submission.pending_files().collect();
        let Some(first) = pending.first() else {
          let ids = format!("({}, {})", publisher.id, submission.id());
          if submission.files.is_empty() {
            info!(
              "no {record_name} found for publisher_id {} submission id {} --> {}",
              publisher.id,
              submission.id(),
              submission.published_url()
            );
            report.add(format!("{context_name}: no {record_name} found for"), submission.published_url());
          } else if submission.files.iter().any(|f| f.state == FileState::Processed) {
            info!("{record_name} already processed {ids}");
            report.add(
              format!("{context_name}: {record_name} already processed (publisher_id, submission_id)"),
              ids,
            );
          } else {
            report.add(format!("[{context_name}] remote_url set for (publisher_id, submission_id)"), ids);
          }
          continue;
        };

        let Some(file_id) = pending.iter().find_map(|record| record.submission_file_id.as_deref()) else {
          warn!("no submission file for {record_name}s of submission {}", submission.id());
          report.add(
            format!("WARNING: {context_name}: no submission file for (publication_id, submission_id)"),
            format!("({}, {})", first.publication_id, submission.id()),
          );
          continue;
        };
        let publication_folder =
          self.config.export.export_path.join(context_name).join(format!("publication_id_{}", first.publication_id));
        let item_folder = publication_folder.join(format!("submission_file_id_{file_id}"));

        self.write_meta_file(&item_folder, submission, publisher, report)?;
        write_collections_file(&item_folder, &self.config.export.collection)?;
        let filenames = self.download_files(publisher, &item_folder, submission, &pending, report).await?;
        if filenames.is_empty() {
          warn!("no file downloaded for {}, drop item", item_folder.display());
          report.add(
            format!("WARNING: {context_name}: no file downloaded for (publication_id, submission_id)"),
            format!("({}, {})", first.publication_id, submission.id()),
          );
          std::fs::remove_dir_all(&publication_folder)?;
          continue;
        }
        write_contents_file(&item_folder, &filenames)?;
        items.push(item_folder);
      }
    }
    info!("exported {} items", items.len());
    Ok(items)
  }

  /// Zips every item folder in the export directory and removes the folders.
  ///
  /// Items whose zip was already transferred (a `.zip.done` marker exists) are not zipped
  /// again; their marker is truncated to save space. Returns the number of bytes written.
  pub fn write_zips(&self, report: &mut Report) -> Result<u64, SafError> {
    let export_path = &self.config.export.export_path;
    if !export_path.is_dir() {
      info!("export path not found -> '{}', stop export", export_path.display());
      report.add("ERROR", format!("export path not found: {}", export_path.display()));
      return Err(SafError::ExportPath(export_path.display().to_string()));
    }

    let mut size_abs = 0;
    for context in sorted_dirs(export_path)? {
      let context_name = file_name(&context);
      for item in sorted_dirs(&context)? {
        debug!("zip folder at {}", item.display());
        let Some(file_folder) = sorted_dirs(&item)?.into_iter().next() else {
          warn!("empty item folder {}", item.display());
          std::fs::remove_dir_all(&item)?;
          continue;
        };
        let name = format!("{context_name}_{}_{}", file_name(&item), file_name(&file_folder));
        let already_done = export_path.join(format!("{name}.zip.done"));
        if already_done.is_file() {
          debug!("{} is already transferred, skip...", already_done.display());
          report.add("zip already transferred", &name);
          if already_done.metadata()?.len() > 0 {
            File::create(&already_done)?;
            info!("empty file content to save space");
          }
          continue;
        }

        let zip_path = export_path.join(format!("{name}.zip"));
        zip_dir(&item, &zip_path)?;
        let zip_size = zip_path.metadata()?.len();
        size_abs += zip_size;
        info!("write zip file {name}.zip with {}", human_size(zip_size));
        report.add("write zip file", format!("{name}.zip"));
        std::fs::remove_dir_all(&item)?;
      }
      std::fs::remove_dir_all(&context)?;
    }

    if size_abs > 0 {
      let total = human_size(size_abs);
      info!("finally wrote {total}, done...");
      report.add("finally wrote", total);
    } else {
      info!("nothing to write, exit");
    }
    Ok(size_abs)
  }
}

/// Localized text of a per-locale dictionary (or plain string), with locale fallback.
fn localized(value: &Value, locale: &str) -> Option<(String, Option<String>)> {
  match value {
    Value::String(text) => Some((text.clone(), None)),
    Value::Object(map) => map
      .get(locale)
      .and_then(|v| model::json_text(v).filter(|t| !t.trim().is_empty()).map(|t| (t, Some(locale.to_string()))))
      .or_else(|| {
        map.iter().find_map(|(key, v)| {
          model::json_text(v).filter(|t| !t.trim().is_empty()).map(|t| (t, Some(key.clone())))
        })
      }),
    _ => None,
  }
}

/// `Family, Given` for each author of a PKP author list.
fn author_values(authors: &Value, locale: &str) -> Vec<String> {
  authors
    .as_array()
    .into_iter()
    .flatten()
    .filter_map(|author| {
      let family = localized(&author["familyName"], locale).map(|(t, _)| t).unwrap_or_default();
      let given = localized(&author["givenName"], locale).map(|(t, _)| t).unwrap_or_default();
      match (family.trim(), given.trim()) {
        ("", "") => None,
        (family, "") => Some(family.to_string()),
        ("", given) => Some(given.to_string()),
        (family, given) => Some(format!("{family}, {given}")),
      }
    })
    .collect()
}

/// Whether every key of `map` looks like a locale.
fn is_locale_map(map: &serde_json::Map<String, Value>) -> bool {
  !map.is_empty() && map.keys().all(|key| LOCALE_KEY.is_match(key))
}

/// Turns an evaluated value into `<dcvalue>` entries.
fn flatten(
  target: &MetaTarget,
  value: &Value,
  locale: &str,
  language: Option<String>,
  out: &mut Vec<DcValue>,
) {
  match value {
    value if expr::is_empty(value) => {},
    Value::Array(items) =>
      for item in items {
        flatten(target, item, locale, language.clone(), out);
      },
    Value::Object(map) if is_locale_map(map) => {
      let chosen = map.get(locale).filter(|v| !expr::is_empty(v)).map(|v| (locale, v)).or_else(|| {
        map.iter().find(|(_, v)| !expr::is_empty(v)).map(|(key, v)| (key.as_str(), v))
      });
      if let Some((key, chosen)) = chosen {
        flatten(target, chosen, locale, Some(locale_to_isolang(key)), out);
      }
    },
    Value::Object(_) => warn!("cannot export structured value for {}", target.field),
    scalar => {
      let Some(mut text) = model::json_text(scalar) else { return };
      if text.contains('<') && text.contains('>') {
        text = html_to_text(&text);
      }
      let text = text.trim();
      if !text.is_empty() {
        out.push(target.value(text.to_string(), language));
      }
    },
  }
}

/// Subdirectories of `dir`, sorted by name.
fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, SafError> {
  let mut dirs: Vec<_> = std::fs::read_dir(dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.is_dir())
    .collect();
  dirs.sort();
  Ok(dirs)
}

/// Last path component as text.
fn file_name(path: &Path) -> String {
  path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Writes the contents of `source` (not `source` itself) into a new zip at `target`.
fn zip_dir(source: &Path, target: &Path) -> Result<(), SafError> {
  let mut zip = ZipWriter::new(File::create(target)?);
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
  add_to_zip(&mut zip, source, "", options)?;
  zip.finish()?;
  Ok(())
}

/// Adds the entries of `dir` below `prefix`, recursing into subdirectories.
fn add_to_zip(
  zip: &mut ZipWriter<File>,
  dir: &Path,
  prefix: &str,
  options: SimpleFileOptions,
) -> Result<(), SafError> {
  let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|entry| entry.ok()).map(|e| e.path()).collect();
  entries.sort();
  for path in entries {
    let name = format!("{prefix}{}", file_name(&path));
    if path.is_dir() {
      zip.add_directory(format!("{name}/"), options)?;
      add_to_zip(zip, &path, &format!("{name}/"), options)?;
    } else {
      zip.start_file(name, options)?;
      std::io::copy(&mut File::open(&path)?, zip)?;
    }
  }
  Ok(())
}
