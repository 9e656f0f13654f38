// ABOUTME: Typed source documents decoded from raw BSON at the read boundary
// ABOUTME: Normalizes identifier type drift (ObjectId vs. string) into SourceId

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::entity::EntityKind;

/// Canonical string form of a document-store identifier.
///
/// The same logical identifier may arrive as a native ObjectId or as its
/// string encoding; both normalize to the same lowercase hex so that equality
/// and identifier-map lookups do not depend on how a field was typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(String);

impl SourceId {
    /// Normalize a BSON value into a source identifier.
    ///
    /// Returns `None` for null/undefined values and empty strings.
    pub fn from_bson(value: &Bson) -> Option<SourceId> {
        match value {
            Bson::Null | Bson::Undefined => None,
            Bson::ObjectId(oid) => Some(SourceId(oid.to_hex())),
            Bson::String(text) => SourceId::parse(text),
            Bson::Int32(n) => Some(SourceId(n.to_string())),
            Bson::Int64(n) => Some(SourceId(n.to_string())),
            other => Some(SourceId(other.clone().into_relaxed_extjson().to_string())),
        }
    }

    /// Normalize the string form of an identifier.
    ///
    /// Strings that parse as an ObjectId are rewritten to its canonical hex.
    pub fn parse(text: &str) -> Option<SourceId> {
        if text.is_empty() {
            return None;
        }
        match ObjectId::parse_str(text) {
            Ok(oid) => Some(SourceId(oid.to_hex())),
            Err(_) => Some(SourceId(text.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<ObjectId> for SourceId {
    fn from(oid: ObjectId) -> Self {
        SourceId(oid.to_hex())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while decoding a raw document into its typed shape.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field `{field}` is not an integer: {value}")]
    InvalidInteger { field: &'static str, value: String },

    #[error("field `{field}` has unsupported type {element_type}")]
    UnsupportedType {
        field: &'static str,
        element_type: String,
    },
}

/// A date as it was stored in the source, normalized later by the mapper.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDate {
    Instant(DateTime<Utc>),
    Text(String),
}

/// Name and contact data joined in from the user-account collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAccount {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Client or agent document with its embedded parent account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonDocument {
    pub source_id: Option<SourceId>,
    pub parent: Option<UserAccount>,
    pub registered_at: Option<RawDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDocument {
    pub source_id: Option<SourceId>,
    pub destination_city: Option<String>,
    pub destination_country: Option<String>,
    pub cost_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TourPackageDocument {
    pub source_id: Option<SourceId>,
    pub main_destination: Option<String>,
    pub total_sale_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaleDocument {
    pub source_id: Option<SourceId>,
    pub client_ref: Option<SourceId>,
    pub agent_ref: Option<SourceId>,
    pub status: Option<String>,
    pub amount: Option<f64>,
    pub sale_date: Option<RawDate>,
    pub satisfaction: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaleLineDocument {
    pub source_id: Option<SourceId>,
    pub sale_ref: Option<SourceId>,
    pub service_ref: Option<SourceId>,
    pub package_ref: Option<SourceId>,
    pub description: Option<String>,
    pub quantity: Option<i32>,
    pub unit_price: Option<f64>,
    pub subtotal: Option<f64>,
}

/// A source document decoded into the shape of its entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDocument {
    Client(PersonDocument),
    Agent(PersonDocument),
    Service(ServiceDocument),
    TourPackage(TourPackageDocument),
    Sale(SaleDocument),
    SaleLine(SaleLineDocument),
}

impl SourceDocument {
    /// Decode a raw document read from the collection backing `kind`.
    ///
    /// Alias fields are read first-present-wins (camelCase before snake_case);
    /// null values and empty strings count as absent.
    pub fn decode(kind: EntityKind, doc: &Document) -> Result<SourceDocument, DecodeError> {
        let source_id = doc.get("_id").and_then(SourceId::from_bson);

        let decoded = match kind {
            EntityKind::Client => SourceDocument::Client(decode_person(source_id, doc)?),
            EntityKind::Agent => SourceDocument::Agent(decode_person(source_id, doc)?),
            EntityKind::Service => SourceDocument::Service(ServiceDocument {
                source_id,
                destination_city: text(doc, &["destinoCiudad", "destino_ciudad"])?,
                destination_country: text(doc, &["destinoPais", "destino_pais"])?,
                cost_price: number(doc, &["precioCosto", "precio_costo"])?,
            }),
            EntityKind::TourPackage => SourceDocument::TourPackage(TourPackageDocument {
                source_id,
                main_destination: text(doc, &["destinoPrincipal", "destino_principal"])?,
                total_sale_price: number(doc, &["precioTotalVenta", "precio_total_venta"])?,
            }),
            EntityKind::Sale => SourceDocument::Sale(SaleDocument {
                source_id,
                client_ref: reference(doc, &["clienteId", "cliente_id"]),
                agent_ref: reference(doc, &["agenteId", "agente_id"]),
                status: text(doc, &["estadoVenta", "estado_venta", "estado"])?,
                amount: number(doc, &["montoTotal", "monto_total", "monto"])?,
                sale_date: date(doc, &["fechaVenta", "fecha_venta"]),
                satisfaction: integer(doc, &["puntuacionSatisfaccion", "puntuacion_satisfaccion"])?,
            }),
            EntityKind::SaleLine => SourceDocument::SaleLine(SaleLineDocument {
                source_id,
                sale_ref: reference(doc, &["ventaId", "venta_id"]),
                service_ref: reference(doc, &["servicioId", "servicio_id"]),
                package_ref: reference(doc, &["paqueteId", "paquete_id"]),
                description: text(doc, &["descripcion"])?,
                quantity: integer(doc, &["cantidad"])?,
                unit_price: number(doc, &["precioUnitario", "precio_unitario"])?,
                subtotal: number(doc, &["subtotal"])?,
            }),
        };

        Ok(decoded)
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SourceDocument::Client(_) => EntityKind::Client,
            SourceDocument::Agent(_) => EntityKind::Agent,
            SourceDocument::Service(_) => EntityKind::Service,
            SourceDocument::TourPackage(_) => EntityKind::TourPackage,
            SourceDocument::Sale(_) => EntityKind::Sale,
            SourceDocument::SaleLine(_) => EntityKind::SaleLine,
        }
    }

    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            SourceDocument::Client(d) | SourceDocument::Agent(d) => d.source_id.as_ref(),
            SourceDocument::Service(d) => d.source_id.as_ref(),
            SourceDocument::TourPackage(d) => d.source_id.as_ref(),
            SourceDocument::Sale(d) => d.source_id.as_ref(),
            SourceDocument::SaleLine(d) => d.source_id.as_ref(),
        }
    }
}

fn decode_person(
    source_id: Option<SourceId>,
    doc: &Document,
) -> Result<PersonDocument, DecodeError> {
    let parent = match doc.get("parent") {
        Some(Bson::Document(account)) => Some(UserAccount {
            first_name: text(account, &["nombre"])?,
            last_name: text(account, &["apellido"])?,
            email: text(account, &["email"])?,
            phone: text(account, &["telefono"])?,
        }),
        _ => None,
    };

    Ok(PersonDocument {
        source_id,
        parent,
        registered_at: date(doc, &["fechaRegistro", "fecha_registro"]),
    })
}

/// Return the first alias that holds a meaningful value.
fn first_present<'a>(doc: &'a Document, keys: &[&'static str]) -> Option<(&'static str, &'a Bson)> {
    keys.iter().find_map(|key| match doc.get(key) {
        None | Some(Bson::Null) | Some(Bson::Undefined) => None,
        Some(Bson::String(s)) if s.is_empty() => None,
        Some(value) => Some((*key, value)),
    })
}

fn text(doc: &Document, keys: &[&'static str]) -> Result<Option<String>, DecodeError> {
    let Some((field, value)) = first_present(doc, keys) else {
        return Ok(None);
    };
    match value {
        Bson::String(s) => Ok(Some(s.clone())),
        Bson::Int32(n) => Ok(Some(n.to_string())),
        Bson::Int64(n) => Ok(Some(n.to_string())),
        Bson::Double(n) => Ok(Some(n.to_string())),
        Bson::Boolean(b) => Ok(Some(b.to_string())),
        other => Err(DecodeError::UnsupportedType {
            field,
            element_type: format!("{:?}", other.element_type()),
        }),
    }
}

fn number(doc: &Document, keys: &[&'static str]) -> Result<Option<f64>, DecodeError> {
    let Some((field, value)) = first_present(doc, keys) else {
        return Ok(None);
    };
    let parsed = match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::String(s) => s.trim().parse::<f64>().ok(),
        other => {
            return Err(DecodeError::UnsupportedType {
                field,
                element_type: format!("{:?}", other.element_type()),
            })
        }
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(DecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn integer(doc: &Document, keys: &[&'static str]) -> Result<Option<i32>, DecodeError> {
    let Some((field, value)) = first_present(doc, keys) else {
        return Ok(None);
    };
    let parsed = match value {
        Bson::Int32(n) => Some(*n),
        Bson::Int64(n) => i32::try_from(*n).ok(),
        // Fractional values truncate toward zero.
        Bson::Double(n) if n.is_finite() && n.abs() < f64::from(i32::MAX) => Some(n.trunc() as i32),
        Bson::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| DecodeError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

fn reference(doc: &Document, keys: &[&'static str]) -> Option<SourceId> {
    first_present(doc, keys).and_then(|(_, value)| SourceId::from_bson(value))
}

fn date(doc: &Document, keys: &[&'static str]) -> Option<RawDate> {
    match first_present(doc, keys)?.1 {
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis()).map(RawDate::Instant),
        Bson::String(s) => Some(RawDate::Text(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_native_and_string_ids_are_equal() {
        let oid = ObjectId::new();
        let native = SourceId::from_bson(&Bson::ObjectId(oid)).unwrap();
        let text = SourceId::from_bson(&Bson::String(oid.to_hex())).unwrap();
        let upper = SourceId::from_bson(&Bson::String(oid.to_hex().to_uppercase())).unwrap();

        assert_eq!(native, text);
        assert_eq!(native, upper);
        assert_eq!(native.as_str(), oid.to_hex());
    }

    #[test]
    fn test_source_id_rejects_null_and_empty() {
        assert!(SourceId::from_bson(&Bson::Null).is_none());
        assert!(SourceId::from_bson(&Bson::String(String::new())).is_none());
        assert_eq!(SourceId::parse("c1").unwrap().as_str(), "c1");
        assert_eq!(SourceId::from_bson(&Bson::Int32(7)).unwrap().as_str(), "7");
    }

    #[test]
    fn test_decode_sale_prefers_camel_case_alias() {
        let raw = doc! {
            "_id": "v1",
            "estadoVenta": "Confirmada",
            "estado": "pendiente",
            "montoTotal": 150,
            "monto": 10.0,
            "clienteId": "c1",
        };
        let SourceDocument::Sale(sale) = SourceDocument::decode(EntityKind::Sale, &raw).unwrap() else {
            panic!("expected a sale");
        };

        assert_eq!(sale.status.as_deref(), Some("Confirmada"));
        assert_eq!(sale.amount, Some(150.0));
        assert_eq!(sale.client_ref.unwrap().as_str(), "c1");
        assert!(sale.agent_ref.is_none());
    }

    #[test]
    fn test_decode_skips_null_and_empty_aliases() {
        let raw = doc! {
            "_id": "v2",
            "estadoVenta": Bson::Null,
            "estado_venta": "",
            "estado": "cancelada",
        };
        let SourceDocument::Sale(sale) = SourceDocument::decode(EntityKind::Sale, &raw).unwrap() else {
            panic!("expected a sale");
        };
        assert_eq!(sale.status.as_deref(), Some("cancelada"));
    }

    #[test]
    fn test_decode_rejects_non_numeric_price() {
        let raw = doc! { "_id": "s1", "precioCosto": "caro" };
        let err = SourceDocument::decode(EntityKind::Service, &raw).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidNumber {
                field: "precioCosto",
                value: "\"caro\"".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_numeric_strings() {
        let raw = doc! { "_id": "p1", "precio_total_venta": " 1200.50 " };
        let SourceDocument::TourPackage(pkg) =
            SourceDocument::decode(EntityKind::TourPackage, &raw).unwrap()
        else {
            panic!("expected a tour package");
        };
        assert_eq!(pkg.total_sale_price, Some(1200.5));
    }

    #[test]
    fn test_decode_person_with_parent() {
        let raw = doc! {
            "_id": ObjectId::new(),
            "usuarioId": "abc",
            "parent": { "nombre": "Ana", "apellido": "Lopez", "email": "ana@example.com" },
        };
        let SourceDocument::Client(person) = SourceDocument::decode(EntityKind::Client, &raw).unwrap() else {
            panic!("expected a client");
        };
        let parent = person.parent.unwrap();
        assert_eq!(parent.first_name.as_deref(), Some("Ana"));
        assert_eq!(parent.last_name.as_deref(), Some("Lopez"));
        assert!(parent.phone.is_none());
    }

    #[test]
    fn test_decode_sale_line_quantity() {
        let raw = doc! { "_id": "d1", "cantidad": 2.9_f64, "ventaId": ObjectId::new() };
        let SourceDocument::SaleLine(line) = SourceDocument::decode(EntityKind::SaleLine, &raw).unwrap() else {
            panic!("expected a sale line");
        };
        assert_eq!(line.quantity, Some(2));
        assert!(line.sale_ref.is_some());

        let bad = doc! { "_id": "d2", "cantidad": "dos" };
        assert!(matches!(
            SourceDocument::decode(EntityKind::SaleLine, &bad),
            Err(DecodeError::InvalidInteger { field: "cantidad", .. })
        ));
    }

    #[test]
    fn test_missing_id_still_decodes() {
        let raw = doc! { "destinoCiudad": "Cusco" };
        let decoded = SourceDocument::decode(EntityKind::Service, &raw).unwrap();
        assert!(decoded.source_id().is_none());
        assert_eq!(decoded.kind(), EntityKind::Service);
    }
}
