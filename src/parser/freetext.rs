//! Heuristic extraction from tester-authored spreadsheets
//!
//! Each sheet has a header row somewhere near the top and one or more rows
//! per scenario: a row with an id starts a scenario, rows with a blank id
//! continue it. Every row is tokenized into tags, dispatched to handlers,
//! and then scanned for bare keywords, date ranges and visit dates. A row is
//! applied to a staged copy of its scenario, so a row that fails to parse
//! contributes nothing.

use std::ops::Range;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::ai::apply_fallback;
use super::tags::{EventTag, Tag, TagKind, tokenize};
use super::{ParseContext, ScenarioExtractor};
use crate::config::Component;
use crate::error::{MockupError, Result};
use crate::scenario::dates::{DATE_RANGE, DATE_TOKEN, DIGIT_DATE_TOKEN};
use crate::scenario::{EnrollmentSpan, EventMeta, Gender, ProductLine, Scenario, Source, VisitSpan};
use crate::workbook::{Sheet, Workbook};

/// Sheets that never hold scenarios
pub const EXCLUDED_SHEETS: [&str; 4] = ["Revision_History", "DST", "Fileid_Summary", "Fileid_Detail"];

const HEADER_KEYWORDS: [&str; 6] = [
    "#tc",
    "mem_nbr",
    "member number",
    "testcase id",
    "member_id",
    "member id",
];

const ID_HEADER_KEYWORDS: [&str; 4] = ["#tc", "id", "mem_nbr", "member number"];

const ID_PLACEHOLDERS: [&str; 6] = ["nan", "none", "#", "#tc", "mem_nbr", "s.n"];

const PROSE_MARKERS: [&str; 3] = ["verify if", "member has", "objective:"];

const VISIT_KEYWORDS: [&str; 3] = ["visit", "encounter", "checkup"];

const DEFAULT_VISIT_TYPE: &str = "Outpatient";

lazy_static! {
    static ref VISIT_DATE_COLUMN: Regex = Regex::new(r"^VISIT_(\d+)_DATE$").unwrap();
    static ref ALL_WORD: Regex = Regex::new(r"\ball\b").unwrap();

    static ref PROD_FLAG: Regex = Regex::new(r"(?i)--prod\s*id\s*(\d+)").unwrap();
    static ref PRODUCT_ATTR: Regex = Regex::new(
        r"(?i)\b(?:product_?id|rollup_?id|prod_?id|pl_?id|product|rollup|prod)\s*(?:[:=]\s*(\w+)|\s+(\d+)\b)"
    )
    .unwrap();
    static ref COVERAGE_ATTR: Regex =
        Regex::new(r"(?i)\b(?:coverage_indicator|coverage_ind|coverage|cover|cov)\s*[:=]\s*(\w+)").unwrap();
    static ref HOSPICE_ATTR: Regex = Regex::new(r"(?i)\bben[-_]hospice\s*[:=]\s*(\w+)").unwrap();

    /// Word-bounded product line aliases, in alias order
    static ref PRODUCT_LINE_WORDS: Vec<(ProductLine, Regex)> = ProductLine::ALIASES
        .iter()
        .map(|(line, aliases)| {
            let alternatives = aliases.iter().map(|alias| regex::escape(alias)).join("|");
            (*line, Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")).unwrap())
        })
        .collect();

    static ref AGE_PHRASE: Regex = Regex::new(r"(?i)\bage[ds]?\s*(?:is|of|[:=])?\s*(\d{1,3})\b").unwrap();
    static ref AGE_RANGE: Regex = Regex::new(r"\b(\d{1,3})\s*(?:-|to)\s*(\d{1,3})\b").unwrap();
    static ref NUMBER: Regex = Regex::new(r"\b\d+\b").unwrap();
    static ref KEY_VALUE: Regex = Regex::new(r"(?i)\b[a-z][a-z0-9_]*\s*[:=]\s*[^\s;,]+").unwrap();

    static ref EXPLICIT_GENDER: Regex =
        Regex::new(r"(?i)\b(?:gender|sex)\s*[:=]?\s*(female|male|f|m)\b").unwrap();
    static ref FEMALE_WORD: Regex = Regex::new(r"(?i)\b(?:female|woman|women|girl)\b").unwrap();
    static ref MALE_WORD: Regex = Regex::new(r"(?i)\b(?:male|man|men|boy)\b").unwrap();
}

/// A scenario plus what the current row has claimed so far
struct RowStage {
    scenario: Scenario,
    sheet: String,
    row: usize,
    /// Lower-case component names claimed by explicit `CE:` tags
    claimed_compliant: FxHashSet<String>,
    /// Lower-case exclusion names claimed by explicit `NE:` tags
    claimed_excluded: FxHashSet<String>,
    suppress_compliant: bool,
    suppress_excluded: bool,
    explicit_product_line: bool,
    explicit_age: bool,
    /// Components marked compliant by this row
    row_compliant: Vec<String>,
    /// `DS:` / `QTY:` / `NDC:` values seen in this row
    pharmacy: EventMeta,
}

impl RowStage {
    fn new(scenario: Scenario, sheet: &str, row: usize) -> Self {
        Self {
            scenario,
            sheet: sheet.to_string(),
            row,
            claimed_compliant: FxHashSet::default(),
            claimed_excluded: FxHashSet::default(),
            suppress_compliant: false,
            suppress_excluded: false,
            explicit_product_line: false,
            explicit_age: false,
            row_compliant: Vec::new(),
            pharmacy: EventMeta::default(),
        }
    }

    fn error(&self, message: &str) -> MockupError {
        MockupError::row_parse(&self.sheet, self.row, message)
    }

    fn mark_compliant(&mut self, name: &str) {
        self.claimed_compliant.insert(name.to_lowercase());
        self.scenario.add_compliant(name);
        if !self.row_compliant.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            self.row_compliant.push(name.to_string());
        }
    }

    fn mark_excluded(&mut self, name: &str) {
        self.claimed_excluded.insert(name.to_lowercase());
        self.scenario.add_excluded(name);
    }

    fn has_pharmacy_meta(&self) -> bool {
        self.pharmacy.days_supply.is_some() || self.pharmacy.quantity.is_some() || self.pharmacy.code.is_some()
    }
}

type TagHandler = fn(&mut RowStage, &Tag, &ParseContext<'_>) -> Result<()>;

/// Tag handlers keyed by tag kind
struct TagRegistry {
    handlers: FxHashMap<TagKind, TagHandler>,
}

impl TagRegistry {
    fn empty() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    fn register(&mut self, kind: TagKind, handler: TagHandler) {
        self.handlers.insert(kind, handler);
    }

    fn dispatch(&self, stage: &mut RowStage, tag: &Tag, ctx: &ParseContext<'_>) -> Result<()> {
        match self.handlers.get(&tag.kind()) {
            Some(handler) => handler(stage, tag, ctx),
            None => {
                log::debug!("No handler registered for {:?}", tag.kind());
                Ok(())
            }
        }
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(TagKind::ProductLine, on_product_line);
        registry.register(TagKind::Age, on_age);
        registry.register(TagKind::AnchorDate, on_anchor_date);
        registry.register(TagKind::BenefitProfile, on_benefit_profile);
        registry.register(TagKind::EventDates, on_event_dates);
        registry.register(TagKind::IndexedEventDate, on_indexed_event_date);
        registry.register(TagKind::NamedEventDate, on_named_event_date);
        registry.register(TagKind::Field, on_field);
        registry.register(TagKind::PinnedVisit, on_pinned_visit);
        registry.register(TagKind::Diagnosis, on_diagnosis);
        registry.register(TagKind::Compliant, on_compliant);
        registry.register(TagKind::Excluded, on_excluded);
        registry.register(TagKind::DaysSupply, on_pharmacy);
        registry.register(TagKind::Quantity, on_pharmacy);
        registry.register(TagKind::Ndc, on_pharmacy);
        registry.register(TagKind::MonthlyFlag, on_monthly_flag);
        registry.register(TagKind::FlagOverride, on_flag_override);
        registry.register(TagKind::Negation, on_flag_override);
        registry
    }
}

fn on_product_line(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::ProductLine(line) = tag {
        stage.scenario.product_line.offer(*line, Source::Explicit);
        stage.explicit_product_line = true;
    }
    Ok(())
}

fn on_age(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::Age(age) = tag {
        if *age > 110 {
            return Err(stage.error(&format!("age {age} is out of range")));
        }
        stage.scenario.age.offer(*age, Source::Explicit);
        stage.explicit_age = true;
    }
    Ok(())
}

fn on_anchor_date(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::AnchorDate(date) = tag {
        stage.scenario.set_anchor_date(date);
    }
    Ok(())
}

fn on_benefit_profile(stage: &mut RowStage, tag: &Tag, ctx: &ParseContext<'_>) -> Result<()> {
    let Tag::BenefitProfile(profile) = tag else {
        return Ok(());
    };
    let fields = &mut stage.scenario.overrides.fields;
    match ctx.benefit_profiles.get(profile) {
        Some(columns) => {
            for column in columns {
                fields.entry(column.clone()).or_insert_with(|| "1".to_string());
            }
        }
        None => {
            fields.entry(format!("BEN_{profile}")).or_insert_with(|| "1".to_string());
        }
    }
    Ok(())
}

fn on_event_dates(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::EventDates(dates) = tag {
        for date in dates {
            if !stage.scenario.event_dates.iter().any(|d| d.eq_ignore_ascii_case(date)) {
                stage.scenario.event_dates.push(date.clone());
            }
        }
    }
    Ok(())
}

fn on_indexed_event_date(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::IndexedEventDate { index, date } = tag {
        if *index == 0 {
            return Err(stage.error("event date indexes start at ED1"));
        }
        stage
            .scenario
            .overrides
            .events_by_index
            .entry(*index)
            .or_insert_with(|| date.clone());
    }
    Ok(())
}

fn on_named_event_date(stage: &mut RowStage, tag: &Tag, ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::NamedEventDate { name, date } = tag {
        let lower = name.to_lowercase();
        let canonical = ctx
            .measure
            .find_component(name)
            .or_else(|| ctx.measure.components().find(|c| c.name.to_lowercase().contains(&lower)))
            .map_or_else(|| name.clone(), |c| c.name.clone());
        let meta = stage.scenario.overrides.event_mut(&canonical);
        if meta.date.is_none() {
            meta.date = Some(date.clone());
        }
    }
    Ok(())
}

fn on_field(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::Field { index, value } = tag {
        stage.scenario.overrides.set_field(format!("FIELD{index}"), value.as_str());
    }
    Ok(())
}

fn on_pinned_visit(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::PinnedVisit { index, key, value } = tag {
        if *index == 0 {
            return Err(stage.error("pinned visit indexes start at V1"));
        }
        stage
            .scenario
            .overrides
            .pinned_visits
            .entry(*index)
            .or_default()
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    Ok(())
}

fn on_diagnosis(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::Diagnosis(code) = tag {
        stage.scenario.overrides.set_field("DIAG_I_1", code.as_str());
    }
    Ok(())
}

/// Resolve an explicitly tagged name against configured components: exact
/// match first, then the longest configured name the text contains, else
/// the text itself
fn resolve_named<'c>(components: impl Iterator<Item = &'c Component>, text: &str) -> String {
    let text = text.trim();
    let lower = text.to_lowercase();
    let mut contained: Option<&Component> = None;

    for component in components {
        if component.name.eq_ignore_ascii_case(text) {
            return component.name.clone();
        }
        let name = component.name.to_lowercase();
        if !name.is_empty()
            && lower.contains(&name)
            && contained.is_none_or(|best| best.name.len() < component.name.len())
        {
            contained = Some(component);
        }
    }

    contained.map_or_else(|| text.to_string(), |c| c.name.clone())
}

fn on_compliant(stage: &mut RowStage, tag: &Tag, ctx: &ParseContext<'_>) -> Result<()> {
    let Tag::Compliant(event) = tag else {
        return Ok(());
    };
    match event {
        EventTag::Named(name) => {
            let name = resolve_named(ctx.measure.components(), name);
            stage.mark_compliant(&name);
        }
        EventTag::Flag(true) => {
            let numerator = ctx.measure.numerator();
            let mut targets: Vec<&Component> = numerator.iter().filter(|c| c.targets("lab")).collect();
            if targets.is_empty() {
                targets.extend(numerator.first());
            }
            if targets.is_empty() {
                log::debug!("CE:1 in {} row {} but no numerator components", stage.sheet, stage.row);
            }
            for component in targets {
                stage.mark_compliant(&component.name);
            }
        }
        EventTag::Flag(false) => stage.suppress_compliant = true,
    }
    Ok(())
}

fn on_excluded(stage: &mut RowStage, tag: &Tag, ctx: &ParseContext<'_>) -> Result<()> {
    let Tag::Excluded(event) = tag else {
        return Ok(());
    };
    match event {
        EventTag::Named(name) => {
            let name = resolve_named(ctx.measure.exclusions.iter(), name);
            stage.mark_excluded(&name);
        }
        EventTag::Flag(true) => {
            if let Some(first) = ctx.measure.exclusions.first() {
                stage.mark_excluded(&first.name);
            }
        }
        EventTag::Flag(false) => stage.suppress_excluded = true,
    }
    Ok(())
}

fn on_pharmacy(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    match tag {
        Tag::DaysSupply(days) => stage.pharmacy.days_supply = Some(*days),
        Tag::Quantity(quantity) => stage.pharmacy.quantity = Some(*quantity),
        Tag::Ndc(code) => stage.pharmacy.code = Some(code.clone()),
        _ => {}
    }
    Ok(())
}

fn on_monthly_flag(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    if let Tag::MonthlyFlag(flag) = tag {
        if !stage.scenario.monthly_overrides.contains(flag) {
            stage.scenario.monthly_overrides.push(flag.clone());
        }
    }
    Ok(())
}

fn on_flag_override(stage: &mut RowStage, tag: &Tag, _ctx: &ParseContext<'_>) -> Result<()> {
    match tag {
        Tag::FlagOverride { field, value } => stage.scenario.overrides.set_field(field.as_str(), value.as_str()),
        Tag::Negation { field } => stage.scenario.overrides.set_field(field.as_str(), "0"),
        _ => {}
    }
    Ok(())
}

/// Column roles found in a sheet's header row
#[derive(Debug)]
struct SheetLayout {
    header_row: usize,
    id: usize,
    scenario: Option<usize>,
    objective: Option<usize>,
    expected: Option<usize>,
    visits: Vec<VisitColumns>,
    /// Column index and upper-case name of each `BEN_*` column
    benefits: Vec<(usize, String)>,
}

#[derive(Debug)]
struct VisitColumns {
    date: usize,
    visit_type: Option<usize>,
    cpt: Option<usize>,
    diag: Option<usize>,
}

impl SheetLayout {
    fn detect(sheet: &Sheet, scan_rows: usize) -> Option<Self> {
        let header_row = sheet.rows.iter().take(scan_rows).position(|row| {
            let joined = row.iter().map(|cell| cell.to_lowercase()).join(" ");
            HEADER_KEYWORDS.iter().any(|keyword| joined.contains(keyword))
        })?;

        let headers: Vec<String> = sheet.rows[header_row]
            .iter()
            .map(|cell| cell.trim().to_lowercase())
            .collect();

        let id = headers
            .iter()
            .position(|h| ID_HEADER_KEYWORDS.iter().any(|k| h.contains(k)))
            .or_else(|| headers.iter().position(|h| h.contains('#') || h.contains("s.n")))
            .unwrap_or(0);

        let text_column = |keyword: &str| {
            headers
                .iter()
                .enumerate()
                .find(|(i, h)| *i != id && h.contains(keyword))
                .map(|(i, _)| i)
        };
        let sibling = |n: &str, suffix: &str| {
            let name = format!("visit_{n}_{suffix}");
            headers.iter().position(|h| *h == name)
        };

        let mut visits = Vec::new();
        let mut benefits = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            let upper = header.to_ascii_uppercase();
            if let Some(caps) = VISIT_DATE_COLUMN.captures(&upper) {
                let n = &caps[1];
                visits.push(VisitColumns {
                    date: i,
                    visit_type: sibling(n, "type"),
                    cpt: sibling(n, "cpt"),
                    diag: sibling(n, "diag"),
                });
            } else if upper.starts_with("BEN_") {
                benefits.push((i, upper));
            }
        }

        Some(Self {
            header_row,
            id,
            scenario: text_column("scenario"),
            objective: text_column("objective"),
            expected: text_column("expected"),
            visits,
            benefits,
        })
    }
}

fn cell(row: &[String], col: Option<usize>) -> &str {
    col.and_then(|c| row.get(c)).map_or("", |value| value.trim())
}

enum IdCell<'a> {
    New(&'a str),
    Continuation,
    Prose,
}

fn classify_id(id: &str, max_len: usize) -> IdCell<'_> {
    let lower = id.to_lowercase();
    if id.is_empty() || ID_PLACEHOLDERS.contains(&lower.as_str()) {
        IdCell::Continuation
    } else if id.chars().count() > max_len || PROSE_MARKERS.iter().any(|m| lower.contains(m)) {
        IdCell::Prose
    } else {
        IdCell::New(id)
    }
}

/// Whether a new scenario passes the measure filter
fn accepts(filter: Option<&str>, sheet: &str, row: &[String], layout: &SheetLayout) -> bool {
    let Some(filter) = filter.map(str::to_lowercase).filter(|f| !f.is_empty()) else {
        return true;
    };
    if sheet.to_lowercase().contains(&filter) {
        return true;
    }
    let text = [Some(layout.id), layout.scenario, layout.objective]
        .into_iter()
        .map(|col| cell(row, col))
        .join(" ")
        .to_lowercase();
    text.contains(&filter) || ALL_WORD.is_match(&text)
}

fn append_text(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(text);
}

/// Free-text extraction strategy
pub struct FreeTextExtractor {
    registry: TagRegistry,
}

impl Default for FreeTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeTextExtractor {
    /// Create an extractor with the standard tag handlers
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: TagRegistry::default(),
        }
    }

    fn extract_sheet(
        &self,
        sheet: &Sheet,
        layout: &SheetLayout,
        ctx: &ParseContext<'_>,
        scenarios: &mut Vec<Scenario>,
        index: &mut FxHashMap<String, usize>,
    ) {
        let mut current: Option<usize> = None;
        let mut skipped = 0usize;

        for (row_idx, row) in sheet.rows.iter().enumerate().skip(layout.header_row + 1) {
            let row_number = row_idx + 1;
            if row.iter().all(|value| value.trim().is_empty()) {
                continue;
            }

            match classify_id(cell(row, Some(layout.id)), ctx.config.max_id_length) {
                IdCell::Prose => {
                    log::debug!("Skipping prose row {row_number} in {}", sheet.name);
                    continue;
                }
                IdCell::Continuation => {}
                IdCell::New(id) => {
                    if !accepts(ctx.config.measure_filter.as_deref(), &sheet.name, row, layout) {
                        log::debug!("Scenario {id} in {} does not match the measure filter", sheet.name);
                        current = None;
                        continue;
                    }
                    let slot = *index.entry(id.to_string()).or_insert_with(|| {
                        let mut scenario = Scenario::new(id);
                        scenario.sheet.clone_from(&sheet.name);
                        scenarios.push(scenario);
                        scenarios.len() - 1
                    });
                    current = Some(slot);
                }
            }

            let Some(slot) = current else {
                log::debug!("Row {row_number} in {} has no scenario to continue", sheet.name);
                continue;
            };

            let mut stage = RowStage::new(scenarios[slot].clone(), &sheet.name, row_number);
            match self.apply_row(&mut stage, row, layout, ctx) {
                Ok(()) => scenarios[slot] = stage.scenario,
                Err(e) => {
                    skipped += 1;
                    log::warn!("Skipping malformed row: {e}");
                }
            }
        }

        if skipped > 0 {
            log::warn!("{skipped} row(s) in {} could not be parsed", sheet.name);
        }
    }

    fn apply_row(
        &self,
        stage: &mut RowStage,
        row: &[String],
        layout: &SheetLayout,
        ctx: &ParseContext<'_>,
    ) -> Result<()> {
        let cells: Vec<&str> = row
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .collect();
        let blob = cells.join(" ; ");

        append_text(&mut stage.scenario.scenario_text, cell(row, layout.scenario));
        append_text(&mut stage.scenario.objective_text, cell(row, layout.objective));
        append_text(&mut stage.scenario.expected_text, cell(row, layout.expected));

        for tag in tokenize(&blob) {
            self.registry.dispatch(stage, &tag, ctx)?;
        }

        classify_keywords(stage, &blob.to_lowercase(), ctx);
        apply_pharmacy_meta(stage, ctx);
        infer_product_line(stage, &blob);
        infer_age(stage, &blob);
        infer_gender(stage, &blob);

        for text in &cells {
            extract_spans(stage, text);
        }
        for text in &cells {
            extract_visit_dates(stage, text);
        }
        apply_visit_columns(stage, row, layout);
        apply_benefit_columns(stage, row, layout, ctx);

        Ok(())
    }
}

impl ScenarioExtractor for FreeTextExtractor {
    fn name(&self) -> &'static str {
        "free-text extractor"
    }

    fn extract(&self, workbook: &Workbook, ctx: &ParseContext<'_>) -> Result<Vec<Scenario>> {
        let mut scenarios = Vec::new();
        let mut index = FxHashMap::default();

        for sheet in &workbook.sheets {
            if EXCLUDED_SHEETS.iter().any(|name| name.eq_ignore_ascii_case(sheet.name.trim())) {
                log::debug!("Skipping sheet {}", sheet.name);
                continue;
            }
            let Some(layout) = SheetLayout::detect(sheet, ctx.config.header_scan_rows) else {
                log::info!("Skipping sheet {}: no header row found", sheet.name);
                continue;
            };
            log::debug!("Sheet {} header at row {}", sheet.name, layout.header_row + 1);

            let before = scenarios.len();
            self.extract_sheet(sheet, &layout, ctx, &mut scenarios, &mut index);
            log::info!("Sheet {}: {} new scenario(s)", sheet.name, scenarios.len() - before);
        }

        if ctx.extractor.is_some() {
            for scenario in &mut scenarios {
                apply_fallback(scenario, ctx.extractor, ctx.measure);
            }
        }

        Ok(scenarios)
    }
}

/// Bare keyword matching for components no explicit tag claimed
fn classify_keywords(stage: &mut RowStage, lower: &str, ctx: &ParseContext<'_>) {
    let negated = |name: &str| lower.contains(&format!("no {name}"));

    if ctx.measure.numerator().iter().any(|c| negated(&c.name.to_lowercase())) {
        stage.suppress_compliant = true;
    }

    if !stage.suppress_compliant {
        for component in ctx.measure.numerator() {
            let name = component.name.to_lowercase();
            if !name.is_empty() && !stage.claimed_compliant.contains(&name) && lower.contains(&name) {
                stage.mark_compliant(&component.name);
            }
        }
    }

    if !stage.suppress_excluded {
        for exclusion in &ctx.measure.exclusions {
            let name = exclusion.name.to_lowercase();
            if !name.is_empty()
                && !stage.claimed_excluded.contains(&name)
                && lower.contains(&name)
                && !negated(&name)
            {
                stage.mark_excluded(&exclusion.name);
            }
        }
    }
}

/// Attach the row's `DS:`/`QTY:`/`NDC:` values to pharmacy components
fn apply_pharmacy_meta(stage: &mut RowStage, ctx: &ParseContext<'_>) {
    if !stage.has_pharmacy_meta() {
        return;
    }
    let is_pharmacy = |name: &String| {
        ctx.measure
            .find_component(name)
            .is_some_and(|c| c.is_pharmacy() || c.targets("rx"))
    };

    let mut targets: Vec<String> = stage.row_compliant.iter().filter(|n| is_pharmacy(n)).cloned().collect();
    if targets.is_empty() {
        targets = stage.scenario.compliant.iter().filter(|n| is_pharmacy(n)).cloned().collect();
    }
    if targets.is_empty() {
        log::debug!("Pharmacy values in {} row {} match no compliant medication", stage.sheet, stage.row);
        return;
    }

    let pharmacy = stage.pharmacy.clone();
    for name in targets {
        stage.scenario.overrides.event_mut(&name).fill_from(&pharmacy);
    }
}

fn infer_product_line(stage: &mut RowStage, blob: &str) {
    if stage.explicit_product_line {
        return;
    }
    if let Some((line, _)) = PRODUCT_LINE_WORDS.iter().find(|(_, re)| re.is_match(blob)) {
        stage.scenario.product_line.offer(*line, Source::Inferred);
    }
}

fn infer_age(stage: &mut RowStage, blob: &str) {
    if stage.explicit_age || !stage.scenario.age.is_default() {
        return;
    }

    let phrase = AGE_PHRASE
        .captures(blob)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|age| *age <= 110);
    if let Some(age) = phrase {
        stage.scenario.age.offer(age, Source::Inferred);
        return;
    }

    let without_dates = DATE_TOKEN.replace_all(blob, " ");
    let stripped = KEY_VALUE.replace_all(&without_dates, " ");

    let midpoint = AGE_RANGE.captures(&stripped).and_then(|caps| {
        let low: u32 = caps[1].parse().ok()?;
        let high: u32 = caps[2].parse().ok()?;
        Some((low + high) / 2).filter(|age| *age <= 110)
    });
    let age = midpoint.or_else(|| {
        NUMBER
            .find_iter(&stripped)
            .filter_map(|m| m.as_str().parse::<u32>().ok())
            .find(|n| (18..=100).contains(n))
    });

    if let Some(age) = age {
        stage.scenario.age.offer(age, Source::Inferred);
    }
}

fn infer_gender(stage: &mut RowStage, blob: &str) {
    if let Some(gender) = EXPLICIT_GENDER.captures(blob).and_then(|caps| Gender::parse(&caps[1])) {
        stage.scenario.gender.offer(gender, Source::Explicit);
    } else if FEMALE_WORD.is_match(blob) {
        stage.scenario.gender.offer(Gender::Female, Source::Inferred);
    } else if MALE_WORD.is_match(blob) {
        stage.scenario.gender.offer(Gender::Male, Source::Inferred);
    }
}

/// Enrollment spans from date ranges, with attributes from the text that
/// follows each range on the same line
fn extract_spans(stage: &mut RowStage, text: &str) {
    let ranges: Vec<_> = DATE_RANGE.captures_iter(text).collect();

    for (i, caps) in ranges.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let line_end = text[whole.end()..]
            .find('\n')
            .map_or(text.len(), |offset| whole.end() + offset);
        let next_start = ranges
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let context = &text[whole.end()..line_end.min(next_start)];

        let mut span = EnrollmentSpan::new(caps[1].trim(), caps[2].trim());
        span.product_id = PROD_FLAG
            .captures(context)
            .or_else(|| PRODUCT_ATTR.captures(context))
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string());
        span.coverage_indicator = COVERAGE_ATTR.captures(context).map(|c| c[1].to_string());
        span.hospice = HOSPICE_ATTR
            .captures(context)
            .map(|c| matches!(c[1].to_ascii_uppercase().as_str(), "Y" | "1" | "YES" | "P"));

        if !stage.scenario.enrollment_spans.contains(&span) {
            stage.scenario.enrollment_spans.push(span);
        }
    }
}

/// Single dates in cells that talk about visits
fn extract_visit_dates(stage: &mut RowStage, text: &str) {
    let lower = text.to_lowercase();
    if !VISIT_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return;
    }

    let ranges: Vec<Range<usize>> = DATE_RANGE.find_iter(text).map(|m| m.range()).collect();
    for m in DIGIT_DATE_TOKEN.find_iter(text) {
        if ranges.iter().any(|r| r.start <= m.start() && m.end() <= r.end) {
            continue;
        }
        let token = m.as_str();
        let scenario = &stage.scenario;
        let boundary = scenario
            .enrollment_spans
            .iter()
            .any(|s| s.start.eq_ignore_ascii_case(token) || s.end.eq_ignore_ascii_case(token));
        let seen = scenario.visit_spans.iter().any(|v| v.date.eq_ignore_ascii_case(token));
        if !boundary && !seen {
            stage.scenario.visit_spans.push(VisitSpan::new(token, DEFAULT_VISIT_TYPE));
        }
    }
}

fn apply_visit_columns(stage: &mut RowStage, row: &[String], layout: &SheetLayout) {
    for columns in &layout.visits {
        let date = cell(row, Some(columns.date));
        if date.is_empty() {
            continue;
        }
        let visit_type = cell(row, columns.visit_type);
        let mut visit = VisitSpan::new(
            date,
            if visit_type.is_empty() { DEFAULT_VISIT_TYPE } else { visit_type },
        );
        visit.code = Some(cell(row, columns.cpt).to_string()).filter(|c| !c.is_empty());
        visit.diagnosis = Some(cell(row, columns.diag).to_string()).filter(|d| !d.is_empty());

        if !stage.scenario.visit_spans.contains(&visit) {
            stage.scenario.visit_spans.push(visit);
        }
    }
}

fn apply_benefit_columns(stage: &mut RowStage, row: &[String], layout: &SheetLayout, ctx: &ParseContext<'_>) {
    for (col, name) in &layout.benefits {
        let raw = cell(row, Some(*col));
        if raw.is_empty() {
            continue;
        }
        let value = match raw.to_ascii_uppercase().as_str() {
            "Y" | "YES" => "1".to_string(),
            "N" | "NO" => "0".to_string(),
            _ => raw.to_string(),
        };

        match ctx.benefit_profiles.get(name) {
            Some(columns) => {
                for column in columns {
                    stage.scenario.overrides.set_field(column.as_str(), value.as_str());
                }
            }
            None => stage.scenario.overrides.set_field(name.as_str(), value),
        }
    }
}
