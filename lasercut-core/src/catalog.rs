use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MM_PER_INCH: f64 = 25.4;
const THICKNESS_MATCH_TOLERANCE_MM: f64 = 0.001;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate material `{0}` in catalog")]
    DuplicateMaterial(String),
    #[error("material name must not be blank")]
    BlankName,
}

/// 材料目录条目：名称作为大小写不敏感的唯一键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct MaterialEntry {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    pub density: f64,
    pub price_per_kg: f64,
    #[serde(default)]
    pub thicknesses: Vec<ThicknessEntry>,
}

impl MaterialEntry {
    /// 按毫米厚度查找，允许 ±0.001mm 误差。
    pub fn thickness(&self, thickness_mm: f64) -> Option<&ThicknessEntry> {
        self.thicknesses
            .iter()
            .find(|entry| (entry.thickness_mm - thickness_mm).abs() <= THICKNESS_MATCH_TOLERANCE_MM)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ThicknessEntry {
    pub thickness_mm: f64,
    #[serde(default)]
    pub extra_price_per_m2: f64,
    #[serde(default)]
    pub finishes: Vec<FinishEntry>,
}

impl ThicknessEntry {
    /// 英寸厚度，保留三位小数。
    pub fn thickness_inch(&self) -> f64 {
        (self.thickness_mm / MM_PER_INCH * 1000.0).round() / 1000.0
    }

    pub fn finish(&self, name: &str) -> Option<&FinishEntry> {
        let wanted = name.trim();
        self.finishes
            .iter()
            .find(|finish| finish.name.trim().eq_ignore_ascii_case(wanted))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct FinishEntry {
    pub name: String,
    #[serde(default)]
    pub extra_price_per_m2: f64,
}

/// 引擎只读访问的材料目录。
pub trait MaterialCatalog: Send + Sync {
    fn find(&self, name: &str) -> Option<MaterialEntry>;

    fn materials(&self) -> Vec<MaterialEntry>;
}

fn catalog_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    entries: Vec<MaterialEntry>,
    index: HashMap<String, usize>,
}

impl InMemoryCatalog {
    pub fn new(entries: impl IntoIterator<Item = MaterialEntry>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for entry in entries {
            let key = catalog_key(&entry.name);
            if key.is_empty() {
                return Err(CatalogError::BlankName);
            }
            if catalog.index.contains_key(&key) {
                return Err(CatalogError::DuplicateMaterial(entry.name));
            }
            catalog.index.insert(key, catalog.entries.len());
            catalog.entries.push(entry);
        }
        Ok(catalog)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MaterialEntry> {
        self.index
            .get(&catalog_key(name))
            .map(|index| &self.entries[*index])
    }
}

impl MaterialCatalog for InMemoryCatalog {
    fn find(&self, name: &str) -> Option<MaterialEntry> {
        self.get(name).cloned()
    }

    fn materials(&self) -> Vec<MaterialEntry> {
        self.entries.clone()
    }
}

/// 可在运行期整体替换的目录：读者拿到快照后不受后续替换影响。
#[derive(Debug, Default)]
pub struct SharedCatalog {
    current: RwLock<Arc<InMemoryCatalog>>,
}

impl SharedCatalog {
    pub fn new(catalog: InMemoryCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<InMemoryCatalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, catalog: InMemoryCatalog) {
        let next = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl MaterialCatalog for SharedCatalog {
    fn find(&self, name: &str) -> Option<MaterialEntry> {
        self.snapshot().find(name)
    }

    fn materials(&self) -> Vec<MaterialEntry> {
        self.snapshot().materials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steel() -> MaterialEntry {
        MaterialEntry {
            name: "Acero Inoxidable".to_string(),
            kind: Some("steel".to_string()),
            density: 8.0,
            price_per_kg: 5000.0,
            thicknesses: vec![ThicknessEntry {
                thickness_mm: 3.0,
                extra_price_per_m2: 1200.0,
                finishes: vec![FinishEntry {
                    name: "Pulido".to_string(),
                    extra_price_per_m2: 800.0,
                }],
            }],
        }
    }

    fn aluminium() -> MaterialEntry {
        MaterialEntry {
            name: "Aluminio".to_string(),
            kind: Some("aluminium".to_string()),
            density: 2.7,
            price_per_kg: 7000.0,
            thicknesses: Vec::new(),
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_trimmed() {
        let catalog = InMemoryCatalog::new([steel(), aluminium()]).expect("catalog");
        assert_eq!(catalog.len(), 2);
        let found = catalog.find("  acero INOXIDABLE ").expect("found");
        assert_eq!(found.name, "Acero Inoxidable");
        assert!(catalog.find("bronce").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut other = steel();
        other.name = "ACERO inoxidable".to_string();
        let err = InMemoryCatalog::new([steel(), other]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateMaterial(name) if name == "ACERO inoxidable"));
    }

    #[test]
    fn thickness_and_finish_lookup() {
        let entry = steel();
        let thickness = entry.thickness(3.0004).expect("thickness within tolerance");
        assert!(entry.thickness(3.01).is_none());
        assert_eq!(thickness.finish("pulido").map(|f| f.extra_price_per_m2), Some(800.0));
        assert!(thickness.finish("Anodizado").is_none());
    }

    #[test]
    fn thickness_in_inches_is_rounded_to_three_places() {
        let entry = ThicknessEntry {
            thickness_mm: 3.0,
            extra_price_per_m2: 0.0,
            finishes: Vec::new(),
        };
        assert_eq!(entry.thickness_inch(), 0.118);
        let entry = ThicknessEntry {
            thickness_mm: 25.4,
            ..entry
        };
        assert_eq!(entry.thickness_inch(), 1.0);
    }

    #[test]
    fn shared_catalog_replace_does_not_affect_snapshots() {
        let shared = SharedCatalog::new(InMemoryCatalog::new([steel()]).expect("catalog"));
        let before = shared.snapshot();
        shared.replace(InMemoryCatalog::new([aluminium()]).expect("catalog"));

        assert!(before.find("acero inoxidable").is_some());
        assert!(shared.find("acero inoxidable").is_none());
        assert!(shared.find("aluminio").is_some());
    }
}
