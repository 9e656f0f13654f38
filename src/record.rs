// ABOUTME: Normalized relational records produced by the document mapper
// ABOUTME: Each record knows its natural key and its SQL parameter values

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;

use crate::entity::EntityKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub origen_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub origen_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub origen_id: String,
    pub destination_city: Option<String>,
    pub destination_country: Option<String>,
    pub cost_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TourPackageRecord {
    pub origen_id: String,
    pub main_destination: Option<String>,
    pub total_sale_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub origen_id: String,
    pub client_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub status: String,
    pub amount: Decimal,
    pub sale_date: NaiveDate,
    pub satisfaction: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleLineRecord {
    pub origen_id: String,
    pub sale_id: Option<i64>,
    pub service_id: Option<i64>,
    pub package_id: Option<i64>,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// One normalized row destined for the table of its entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRecord {
    Client(ClientRecord),
    Agent(AgentRecord),
    Service(ServiceRecord),
    TourPackage(TourPackageRecord),
    Sale(SaleRecord),
    SaleLine(SaleLineRecord),
}

impl TargetRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            TargetRecord::Client(_) => EntityKind::Client,
            TargetRecord::Agent(_) => EntityKind::Agent,
            TargetRecord::Service(_) => EntityKind::Service,
            TargetRecord::TourPackage(_) => EntityKind::TourPackage,
            TargetRecord::Sale(_) => EntityKind::Sale,
            TargetRecord::SaleLine(_) => EntityKind::SaleLine,
        }
    }

    /// The natural key shared by both stores.
    pub fn origen_id(&self) -> &str {
        match self {
            TargetRecord::Client(r) => &r.origen_id,
            TargetRecord::Agent(r) => &r.origen_id,
            TargetRecord::Service(r) => &r.origen_id,
            TargetRecord::TourPackage(r) => &r.origen_id,
            TargetRecord::Sale(r) => &r.origen_id,
            TargetRecord::SaleLine(r) => &r.origen_id,
        }
    }

    /// Parameter values in the column order of `target::schema::columns(kind)`.
    pub fn sql_values(&self) -> Vec<Box<dyn ToSql + Sync + Send>> {
        match self {
            TargetRecord::Client(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.name.clone()),
                Box::new(r.email.clone()),
                Box::new(r.phone.clone()),
                Box::new(r.registered_at),
            ],
            TargetRecord::Agent(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.name.clone()),
                Box::new(r.email.clone()),
                Box::new(r.phone.clone()),
            ],
            TargetRecord::Service(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.destination_city.clone()),
                Box::new(r.destination_country.clone()),
                Box::new(r.cost_price),
            ],
            TargetRecord::TourPackage(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.main_destination.clone()),
                Box::new(r.total_sale_price),
            ],
            TargetRecord::Sale(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.client_id),
                Box::new(r.agent_id),
                Box::new(r.status.clone()),
                Box::new(r.amount),
                Box::new(r.sale_date),
                Box::new(r.satisfaction),
            ],
            TargetRecord::SaleLine(r) => vec![
                Box::new(r.origen_id.clone()),
                Box::new(r.sale_id),
                Box::new(r.service_id),
                Box::new(r.package_id),
                Box::new(r.description.clone()),
                Box::new(r.quantity),
                Box::new(r.unit_price),
                Box::new(r.subtotal),
            ],
        }
    }
}
