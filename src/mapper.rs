// ABOUTME: Document mapper - pure conversion of typed source documents to target records
// ABOUTME: Applies defaults, numeric/date coercion and foreign-key lookups

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::record::{
    AgentRecord, ClientRecord, SaleLineRecord, SaleRecord, ServiceRecord, TargetRecord,
    TourPackageRecord,
};
use crate::source::document::{
    PersonDocument, RawDate, SaleDocument, SaleLineDocument, ServiceDocument, SourceDocument,
    TourPackageDocument, UserAccount,
};
use crate::target::IdentifierMaps;

/// Placeholder stored when a person has neither first nor last name.
pub const NO_NAME: &str = "Sin nombre";

/// Status assigned to sales that carry none.
pub const DEFAULT_SALE_STATUS: &str = "pendiente";

/// Wall-clock values used for defaults, fixed once per pass.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext {
    pub now: DateTime<Utc>,
}

impl MappingContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// Outcome of mapping one entity kind's documents.
#[derive(Debug, Default)]
pub struct MappedBatch {
    pub records: Vec<TargetRecord>,
    pub rejected: usize,
}

/// Map every document, dropping the ones the mapper rejects.
pub fn map_documents(
    documents: &[SourceDocument],
    maps: &IdentifierMaps,
    ctx: &MappingContext,
) -> MappedBatch {
    let mut batch = MappedBatch::default();
    for doc in documents {
        match map_document(doc, maps, ctx) {
            Some(record) => batch.records.push(record),
            None => {
                tracing::debug!("Rejected {} document without a source id", doc.kind());
                batch.rejected += 1;
            }
        }
    }
    batch
}

/// Map one document to its target record, or `None` if it has no source id.
pub fn map_document(
    doc: &SourceDocument,
    maps: &IdentifierMaps,
    ctx: &MappingContext,
) -> Option<TargetRecord> {
    match doc {
        SourceDocument::Client(d) => map_client(d, ctx).map(TargetRecord::Client),
        SourceDocument::Agent(d) => map_agent(d).map(TargetRecord::Agent),
        SourceDocument::Service(d) => map_service(d).map(TargetRecord::Service),
        SourceDocument::TourPackage(d) => map_tour_package(d).map(TargetRecord::TourPackage),
        SourceDocument::Sale(d) => map_sale(d, maps, ctx).map(TargetRecord::Sale),
        SourceDocument::SaleLine(d) => map_sale_line(d, maps).map(TargetRecord::SaleLine),
    }
}

pub fn map_client(doc: &PersonDocument, ctx: &MappingContext) -> Option<ClientRecord> {
    let origen_id = doc.source_id.as_ref()?.to_string();
    let account = doc.parent.clone().unwrap_or_default();

    let registered_at = match &doc.registered_at {
        Some(RawDate::Instant(at)) => *at,
        Some(RawDate::Text(text)) => parse_timestamp(text).unwrap_or(ctx.now),
        None => ctx.now,
    };

    Some(ClientRecord {
        origen_id,
        name: full_name(&account),
        email: account.email.unwrap_or_default(),
        phone: account.phone,
        registered_at,
    })
}

pub fn map_agent(doc: &PersonDocument) -> Option<AgentRecord> {
    let origen_id = doc.source_id.as_ref()?.to_string();
    let account = doc.parent.clone().unwrap_or_default();

    Some(AgentRecord {
        origen_id,
        name: full_name(&account),
        email: account.email.unwrap_or_default(),
        phone: account.phone,
    })
}

pub fn map_service(doc: &ServiceDocument) -> Option<ServiceRecord> {
    Some(ServiceRecord {
        origen_id: doc.source_id.as_ref()?.to_string(),
        destination_city: doc.destination_city.clone(),
        destination_country: doc.destination_country.clone(),
        cost_price: money(doc.cost_price),
    })
}

pub fn map_tour_package(doc: &TourPackageDocument) -> Option<TourPackageRecord> {
    Some(TourPackageRecord {
        origen_id: doc.source_id.as_ref()?.to_string(),
        main_destination: doc.main_destination.clone(),
        total_sale_price: money(doc.total_sale_price),
    })
}

pub fn map_sale(
    doc: &SaleDocument,
    maps: &IdentifierMaps,
    ctx: &MappingContext,
) -> Option<SaleRecord> {
    let origen_id = doc.source_id.as_ref()?.to_string();

    let status = doc
        .status
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_else(|| DEFAULT_SALE_STATUS.to_string());

    Some(SaleRecord {
        origen_id,
        client_id: maps.clients.resolve(doc.client_ref.as_ref()),
        agent_id: maps.agents.resolve(doc.agent_ref.as_ref()),
        status,
        amount: money(doc.amount),
        sale_date: sale_date(doc.sale_date.as_ref(), ctx),
        satisfaction: doc.satisfaction,
    })
}

pub fn map_sale_line(doc: &SaleLineDocument, maps: &IdentifierMaps) -> Option<SaleLineRecord> {
    Some(SaleLineRecord {
        origen_id: doc.source_id.as_ref()?.to_string(),
        sale_id: maps.sales.resolve(doc.sale_ref.as_ref()),
        service_id: maps.services.resolve(doc.service_ref.as_ref()),
        package_id: maps.packages.resolve(doc.package_ref.as_ref()),
        description: doc.description.clone().unwrap_or_default(),
        quantity: doc.quantity.unwrap_or(1),
        unit_price: money(doc.unit_price),
        subtotal: money(doc.subtotal),
    })
}

fn full_name(account: &UserAccount) -> String {
    let first = account.first_name.as_deref().unwrap_or("");
    let last = account.last_name.as_deref().unwrap_or("");
    let joined = format!("{} {}", first, last);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        NO_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Coerce an optional amount to a two-decimal fixed-point value, defaulting to zero.
pub fn money(value: Option<f64>) -> Decimal {
    value
        .and_then(Decimal::from_f64_retain)
        .map(|d| d.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

/// Normalize a sale date; anything unparseable becomes the pass date.
pub fn sale_date(raw: Option<&RawDate>, ctx: &MappingContext) -> NaiveDate {
    match raw {
        Some(RawDate::Instant(at)) => at.date_naive(),
        Some(RawDate::Text(text)) => parse_date(text).unwrap_or_else(|| ctx.today()),
        None => ctx.today(),
    }
}

/// Parse an ISO-8601 date or date-time, keeping the calendar date in the
/// string's own offset. A trailing `Z` is read as UTC.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Some(naive) = parse_naive_datetime(text) {
        return Some(naive.date());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = parse_naive_datetime(text) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}
