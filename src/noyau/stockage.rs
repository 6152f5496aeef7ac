// src/noyau/stockage.rs
//
// Frontière de persistance
// ------------------------
// Espace d'index (i64) :
// - 0  : expression principale (jamais stockée)
// - -1 : copie de la principale pour l'historique (jamais stockée)
// - < -1 : historique, alloué vers le bas
// - > 0  : mémoire / archives hors historique, alloué vers le haut
//
// Le moteur ne suppose rien de plus que "on relit ce qu'on a écrit".

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::erreurs::{CalcError, Resultat};

/// Premier index d'historique (le plus récent est le plus petit).
pub const PREMIER_INDEX_HISTORIQUE: i64 = -2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRow {
    /// Expression sérialisée (Expression::to_bytes).
    pub expression: Vec<u8>,
    pub degree_mode: bool,
    pub long_timeout: bool,
    /// Millisecondes depuis l'époque Unix ; 0 = à remplir par le stockage.
    pub timestamp: i64,
}

pub trait ExpressionStore: Send + Sync {
    fn get_row(&self, index: i64) -> Resultat<StoredRow>;
    /// Ajoute une ligne et renvoie son index (hors historique : index positif).
    fn add_row(&self, hors_historique: bool, row: StoredRow) -> Resultat<i64>;
    /// Plus petit index utilisé, ou -1 si l'historique est vide.
    fn min_index(&self) -> i64;
    /// Plus grand index utilisé, ou 0 s'il n'y en a pas.
    fn max_index(&self) -> i64;
    fn erase_all(&self);
}

/// Implémentation de référence, en mémoire.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lignes: Mutex<BTreeMap<i64, StoredRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lignes.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Horodatage des lignes (ms depuis l'époque Unix).
pub fn horodatage() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn verrou_empoisonne<T>(_: T) -> CalcError {
    CalcError::Format("stockage indisponible".into())
}

impl ExpressionStore for MemoryStore {
    fn get_row(&self, index: i64) -> Resultat<StoredRow> {
        let lignes = self.lignes.lock().map_err(verrou_empoisonne)?;
        lignes
            .get(&index)
            .cloned()
            .ok_or_else(|| CalcError::Format(format!("aucune expression à l'index {index}")))
    }

    fn add_row(&self, hors_historique: bool, mut row: StoredRow) -> Resultat<i64> {
        let mut lignes = self.lignes.lock().map_err(verrou_empoisonne)?;
        let index = if hors_historique {
            lignes.keys().next_back().copied().filter(|i| *i > 0).unwrap_or(0) + 1
        } else {
            lignes
                .keys()
                .next()
                .copied()
                .filter(|i| *i < 0)
                .map_or(PREMIER_INDEX_HISTORIQUE, |i| i - 1)
        };
        if row.timestamp == 0 {
            row.timestamp = horodatage();
        }
        lignes.insert(index, row);
        Ok(index)
    }

    fn min_index(&self) -> i64 {
        self.lignes
            .lock()
            .ok()
            .and_then(|l| l.keys().next().copied())
            .filter(|i| *i < 0)
            .unwrap_or(-1)
    }

    fn max_index(&self) -> i64 {
        self.lignes
            .lock()
            .ok()
            .and_then(|l| l.keys().next_back().copied())
            .filter(|i| *i > 0)
            .unwrap_or(0)
    }

    fn erase_all(&self) {
        if let Ok(mut l) = self.lignes.lock() {
            l.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ligne(o: u8) -> StoredRow {
        StoredRow {
            expression: vec![o],
            degree_mode: false,
            long_timeout: false,
            timestamp: 0,
        }
    }

    #[test]
    fn allocation_des_index() {
        let s = MemoryStore::new();
        assert_eq!(s.min_index(), -1);
        assert_eq!(s.max_index(), 0);
        assert_eq!(s.add_row(false, ligne(1)).unwrap(), -2);
        assert_eq!(s.add_row(false, ligne(2)).unwrap(), -3);
        assert_eq!(s.add_row(true, ligne(3)).unwrap(), 1);
        assert_eq!(s.add_row(true, ligne(4)).unwrap(), 2);
        assert_eq!(s.min_index(), -3);
        assert_eq!(s.max_index(), 2);
    }

    #[test]
    fn relecture_et_horodatage() {
        let s = MemoryStore::new();
        let i = s.add_row(true, ligne(7)).unwrap();
        let r = s.get_row(i).unwrap();
        assert_eq!(r.expression, vec![7]);
        assert!(r.timestamp > 0);
        assert!(matches!(s.get_row(99), Err(CalcError::Format(_))));
    }

    #[test]
    fn effacement() {
        let s = MemoryStore::new();
        s.add_row(false, ligne(1)).unwrap();
        s.erase_all();
        assert!(s.is_empty());
        assert_eq!(s.add_row(false, ligne(1)).unwrap(), -2);
    }
}
