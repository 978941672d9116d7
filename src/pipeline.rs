// src/pipeline.rs
//
// Per-invoice flow: extract text, detect supplier, produce raw line items
// (LLM first, generic parser as fallback), then normalize every line
// through the UOM engine with one batched lookup round trip per invoice.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{Config, LlmSection};
use crate::heuristics;
use crate::llm_client;
use crate::llm_extract;
use crate::lookup::{LlmUomLookup, LookupRequest, UomLookup};
use crate::models::{InvoiceResult, NormalizedLineItem};
use crate::pdf_extract::{self, PdfContent};
use crate::supplier;
use crate::uom::{self, EngineParams, PackCandidate};

/// Resolved per-run state shared read-only by all invoice workers.
pub struct Pipeline {
    params: EngineParams,
    use_llm_primary: bool,
    use_llm_fallback: bool,
    lookup: Option<Arc<dyn UomLookup>>,
    client: Client,
    llm: LlmSection,
}

impl Pipeline {
    /// Build the run state from config, probing the LLM backend once.
    /// A dead backend turns the LLM features off for the whole run instead
    /// of failing every invoice individually.
    pub async fn from_config(config: &Config) -> Self {
        let client = Client::new();
        let available = llm_client::llm_available(&client, &config.llm).await;
        let wants_llm = config.pipeline.use_llm_primary
            || config.pipeline.use_llm_fallback
            || config.pipeline.use_lookup_agent;
        if !available && wants_llm {
            warn!("LLM backend unavailable; running with deterministic parsing only");
        }

        let lookup: Option<Arc<dyn UomLookup>> = (available && config.pipeline.use_lookup_agent)
            .then(|| {
                Arc::new(LlmUomLookup::new(client.clone(), config.llm.clone()))
                    as Arc<dyn UomLookup>
            });

        Self {
            params: config.engine.params(),
            use_llm_primary: available && config.pipeline.use_llm_primary,
            use_llm_fallback: available && config.pipeline.use_llm_fallback,
            lookup,
            client,
            llm: config.llm.clone(),
        }
    }

    /// Process one invoice PDF. Never errors: unreadable and scanned files
    /// come back as failed results so the batch keeps going.
    pub async fn process_invoice(&self, pdf_path: &Path) -> InvoiceResult {
        let source_file = file_name(pdf_path);
        let text = match pdf_extract::extract_from_file(pdf_path) {
            PdfContent::Text(text) => text,
            PdfContent::ScannedImage => {
                warn!(file = %source_file, "Scanned PDF; no OCR path available");
                return InvoiceResult::failed(&source_file, "scanned PDF: no extractable text");
            }
            PdfContent::Error(e) => {
                error!(file = %source_file, error = %e, "PDF extraction failed");
                return InvoiceResult::failed(&source_file, &e);
            }
        };
        self.process_text(&source_file, &text).await
    }

    /// Everything after text extraction; separated so tests can feed text
    /// straight in.
    async fn process_text(&self, source_file: &str, text: &str) -> InvoiceResult {
        let hint = supplier::detect_supplier(text);

        let mut parser_used = "llm_primary";
        let (mut supplier_name, mut raw_items) = if self.use_llm_primary {
            llm_extract::extract_all(&self.client, &self.llm, text, Some(&hint)).await
        } else {
            (hint.clone(), Vec::new())
        };

        if raw_items.is_empty() {
            raw_items = heuristics::extract_lines(text);
            parser_used = "generic";
            supplier_name = hint.clone();

            // One LLM attempt per invoice: when primary already came back
            // empty, retrying the same call buys nothing.
            if raw_items.is_empty() && self.use_llm_fallback && !self.use_llm_primary {
                let (s, items) =
                    llm_extract::extract_all(&self.client, &self.llm, text, Some(&hint)).await;
                if !items.is_empty() {
                    supplier_name = s;
                    raw_items = items;
                    parser_used = "llm_fallback";
                }
            }
        }

        let mut candidates: Vec<Option<PackCandidate>> =
            raw_items.iter().map(uom::parse_line).collect();

        if let Some(lookup) = &self.lookup {
            let requests: Vec<LookupRequest> = raw_items
                .iter()
                .enumerate()
                .filter(|(i, raw)| uom::needs_lookup(raw, candidates[*i].as_ref(), &self.params))
                .map(|(i, raw)| LookupRequest {
                    line_index: i,
                    description: raw.description.clone(),
                    manufacturer_part_number: raw.manufacturer_part_number.clone(),
                    original_uom: raw.original_uom.clone(),
                })
                .collect();

            if !requests.is_empty() {
                let responses = lookup.resolve_batch(&supplier_name, &requests).await;
                for req in &requests {
                    // The line was handed to the collaborator; its verdict
                    // replaces the weak deterministic candidate either way.
                    candidates[req.line_index] = responses
                        .get(&req.line_index)
                        .and_then(|r| r.to_candidate(req.original_uom.as_deref()));
                }
            }
        }

        let line_items: Vec<NormalizedLineItem> = raw_items
            .iter()
            .zip(candidates)
            .map(|(raw, candidate)| uom::finalize_line(raw, candidate, &self.params))
            .collect();

        let mut raw_metadata = BTreeMap::new();
        raw_metadata.insert("parser".to_string(), parser_used.to_string());
        let result = InvoiceResult {
            source_file: source_file.to_string(),
            supplier_name,
            line_items,
            raw_metadata,
        };
        info!(
            file = %result.source_file,
            supplier = %result.supplier_name,
            lines = result.line_items.len(),
            escalations = result.escalation_count(),
            parser = parser_used,
            "Invoice processed"
        );
        result
    }
}

/// Process every `*.pdf` under `input_dir`, writing `<stem>_structured.json`
/// per invoice into `output_dir`. Results come back in input (sorted-name)
/// order regardless of completion order.
pub async fn run_on_folder(
    pipeline: Arc<Pipeline>,
    input_dir: &Path,
    output_dir: &Path,
    parallelism: usize,
) -> Result<Vec<InvoiceResult>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;
    if !input_dir.exists() {
        std::fs::create_dir_all(input_dir)?;
        info!(dir = %input_dir.display(), "Created input directory; add PDFs and run again");
        return Ok(Vec::new());
    }

    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    if pdfs.is_empty() {
        info!(dir = %input_dir.display(), "No PDFs found");
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut handles = Vec::with_capacity(pdfs.len());
    for path in &pdfs {
        let pipeline = Arc::clone(&pipeline);
        let semaphore = Arc::clone(&semaphore);
        let path = path.clone();
        let output_dir = output_dir.to_path_buf();
        let span = info_span!("invoice", file = %file_name(&path));
        handles.push(tokio::spawn(
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_and_write(&pipeline, &path, &output_dir).await
            }
            .instrument(span),
        ));
    }

    // Awaiting in spawn order keeps results aligned with the input list.
    let mut results = Vec::with_capacity(handles.len());
    for (handle, path) in handles.into_iter().zip(&pdfs) {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!(file = %file_name(path), error = %e, "Invoice worker panicked");
                results.push(InvoiceResult::failed(&file_name(path), "worker task failed"));
            }
        }
    }
    Ok(results)
}

async fn process_and_write(
    pipeline: &Pipeline,
    pdf_path: &Path,
    output_dir: &Path,
) -> InvoiceResult {
    let result = pipeline.process_invoice(pdf_path).await;
    match write_result(&result, pdf_path, output_dir) {
        Ok(()) => result,
        Err(e) => {
            error!(file = %result.source_file, error = %e, "Failed to write result JSON");
            InvoiceResult::failed(&result.source_file, &format!("output write failed: {e}"))
        }
    }
}

fn write_result(
    result: &InvoiceResult,
    pdf_path: &Path,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let stem = pdf_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("invoice");
    let out_file = output_dir.join(format!("{stem}_structured.json"));
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(&out_file, json)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn deterministic_pipeline(lookup: Option<Arc<dyn UomLookup>>) -> Pipeline {
        Pipeline {
            params: EngineParams::default(),
            use_llm_primary: false,
            use_llm_fallback: false,
            lookup,
            client: Client::new(),
            llm: LlmSection::default(),
        }
    }

    /// Canned collaborator: answers from a fixed map, records nothing.
    struct CannedLookup(HashMap<usize, LookupResponse>);

    #[async_trait]
    impl UomLookup for CannedLookup {
        async fn resolve_batch(
            &self,
            _supplier_name: &str,
            requests: &[LookupRequest],
        ) -> HashMap<usize, LookupResponse> {
            requests
                .iter()
                .filter_map(|r| self.0.get(&r.line_index).map(|v| (r.line_index, v.clone())))
                .collect()
        }
    }

    #[tokio::test]
    async fn generic_path_normalizes_evidenced_pack_lines() {
        let text = "ULINE SHIPPING SUPPLIES\n\
                    www.uline.com\n\
                    Invoice 4417 Date 08/12\n\
                    NITRILE GLOVES LARGE 25/CS  25  0.373  9.33\n\
                    TOTAL  9.33\n";
        let pipeline = deterministic_pipeline(None);
        let result = pipeline.process_text("inv_4417.pdf", text).await;

        assert_eq!(result.supplier_name, "ULINE");
        assert_eq!(result.raw_metadata.get("parser").map(String::as_str), Some("generic"));
        assert_eq!(result.line_items.len(), 1);
        let line = &result.line_items[0];
        assert_eq!(line.description, "NITRILE GLOVES LARGE 25/CS");
        assert_eq!(line.original_uom.as_deref(), Some("CS"));
        assert_eq!(line.detected_pack_quantity, Some(25));
        assert_eq!(line.canonical_uom.as_deref(), Some("EA"));
        assert_eq!(line.price_per_base_unit, Some(0.0149));
        assert!(!line.escalation_flag);
        assert_eq!(line.confidence, 0.7);
    }

    #[tokio::test]
    async fn lookup_verdict_supplies_the_missing_pack() {
        let text = "COPY PAPER LETTER  CS  3  42.375  127.13\n";
        let responses = HashMap::from([(
            0,
            LookupResponse {
                canonical_uom: "EA".to_string(),
                detected_pack_quantity: Some(500),
                confidence: 0.9,
                escalation: false,
            },
        )]);
        let pipeline = deterministic_pipeline(Some(Arc::new(CannedLookup(responses))));
        let result = pipeline.process_text("paper.pdf", text).await;

        assert_eq!(result.line_items.len(), 1);
        let line = &result.line_items[0];
        assert_eq!(line.detected_pack_quantity, Some(500));
        assert_eq!(line.canonical_uom.as_deref(), Some("EA"));
        assert_eq!(line.price_per_base_unit, Some(0.0848));
        assert_eq!(line.confidence, 0.63);
        assert!(!line.escalation_flag);
    }

    #[tokio::test]
    async fn silent_lookup_leaves_the_line_without_a_pack() {
        let text = "Gloves PK10  1  5.00  5.00\n";
        let pipeline = deterministic_pipeline(Some(Arc::new(CannedLookup(HashMap::new()))));
        let result = pipeline.process_text("gloves.pdf", text).await;

        assert_eq!(result.line_items.len(), 1);
        let line = &result.line_items[0];
        assert!(line.escalation_flag);
        assert_eq!(line.escalation_reason.as_deref(), Some("no pack quantity found"));
        assert_eq!(line.detected_pack_quantity, None);
        assert_eq!(line.canonical_uom, None);
    }

    #[tokio::test]
    async fn folder_runner_preserves_order_and_records_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input");
        let output = tmp.path().join("output");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("b_invoice.pdf"), b"not a pdf").unwrap();
        std::fs::write(input.join("a_invoice.pdf"), b"also not a pdf").unwrap();
        std::fs::write(input.join("notes.txt"), b"ignored").unwrap();

        let pipeline = Arc::new(deterministic_pipeline(None));
        let results = run_on_folder(pipeline, &input, &output, 4).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_file, "a_invoice.pdf");
        assert_eq!(results[1].source_file, "b_invoice.pdf");
        for result in &results {
            assert_eq!(result.supplier_name, "Error");
            assert!(result.raw_metadata.contains_key("error"));
        }
        assert!(output.join("a_invoice_structured.json").exists());
        assert!(output.join("b_invoice_structured.json").exists());

        let written: InvoiceResult = serde_json::from_str(
            &std::fs::read_to_string(output.join("a_invoice_structured.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.source_file, "a_invoice.pdf");
    }

    #[tokio::test]
    async fn missing_input_dir_is_created_and_yields_no_results() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("does_not_exist_yet");
        let output = tmp.path().join("output");

        let pipeline = Arc::new(deterministic_pipeline(None));
        let results = run_on_folder(pipeline, &input, &output, 1).await.unwrap();
        assert!(results.is_empty());
        assert!(input.is_dir());
    }

    #[tokio::test]
    async fn heuristics_backend_disables_every_llm_feature() {
        let config: Config = toml::from_str("[llm]\nbackend = \"heuristics\"").unwrap();
        let pipeline = Pipeline::from_config(&config).await;
        assert!(!pipeline.use_llm_primary);
        assert!(!pipeline.use_llm_fallback);
        assert!(pipeline.lookup.is_none());
    }
}
