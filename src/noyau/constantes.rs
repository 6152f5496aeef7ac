// src/noyau/constantes.rs
//
// Constantes nommées
// ------------------
// Ensemble fermé de réels pour lesquels on connaît des faits exacts :
//   1, π, e, √n et ln n pour n ∈ {2,3,5,6,7,10}
// - égalité : par nom (jamais par approximation)
// - indépendance : table codée en dur (rapport irrationnel garanti)
// - valeur numérique : Cr partagé, construit une seule fois

use std::collections::HashMap;
use std::sync::OnceLock;

use num_bigint::BigInt;

use super::reel_constructif::{e_construit, ln_petit_entier, pi, Cr};

/// Entiers dont √n et ln n sont nommés.
pub const PETITS_ENTIERS: [u8; 6] = [2, 3, 5, 6, 7, 10];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstanteNommee {
    Un,
    Pi,
    E,
    Racine(u8),
    Ln(u8),
}

impl ConstanteNommee {
    /// Le carré de la constante, s'il est entier (1 pour Un, n pour √n).
    pub fn carre(self) -> Option<u8> {
        match self {
            ConstanteNommee::Un => Some(1),
            ConstanteNommee::Racine(n) => Some(n),
            _ => None,
        }
    }

    /// n tel que la constante vaut ln n.
    pub fn exp_de(self) -> Option<u8> {
        match self {
            ConstanteNommee::Ln(n) => Some(n),
            _ => None,
        }
    }

    /// √n nommée (n = 1 donne Un).
    pub fn racine(n: u8) -> Option<Self> {
        if n == 1 {
            Some(ConstanteNommee::Un)
        } else if PETITS_ENTIERS.contains(&n) {
            Some(ConstanteNommee::Racine(n))
        } else {
            None
        }
    }

    pub fn ln(n: u8) -> Option<Self> {
        PETITS_ENTIERS.contains(&n).then_some(ConstanteNommee::Ln(n))
    }

    pub fn nom(self) -> String {
        match self {
            ConstanteNommee::Un => String::new(),
            ConstanteNommee::Pi => "π".to_string(),
            ConstanteNommee::E => "e".to_string(),
            ConstanteNommee::Racine(n) => format!("√{n}"),
            ConstanteNommee::Ln(n) => format!("ln({n})"),
        }
    }

    /// Algébrique certaine (1 ou racine carrée d'entier).
    pub fn algebrique(self) -> bool {
        self.carre().is_some()
    }

    /// Rapport irrationnel garanti entre deux constantes distinctes.
    ///
    /// π et e sont transcendants : indépendants de tout algébrique (mais on ne
    /// sait rien de π/e). Deux autres constantes nommées distinctes ont toujours
    /// un rapport irrationnel.
    pub fn independantes(a: Self, b: Self) -> bool {
        use ConstanteNommee::{Pi, E};
        if a == b {
            return false;
        }
        match (a, b) {
            (Pi | E, autre) | (autre, Pi | E) => autre.algebrique(),
            _ => true,
        }
    }

    /// Valeur numérique partagée.
    pub fn cr(self) -> Cr {
        let table = VALEURS.get_or_init(construire_valeurs);
        match table.get(&self) {
            Some(c) => c.clone(),
            // hors table : seulement des racines/logs hors de PETITS_ENTIERS,
            // que les constructeurs ci-dessus refusent
            None => Cr::un(),
        }
    }
}

static VALEURS: OnceLock<HashMap<ConstanteNommee, Cr>> = OnceLock::new();

fn construire_valeurs() -> HashMap<ConstanteNommee, Cr> {
    let mut t = HashMap::new();
    t.insert(ConstanteNommee::Un, Cr::un());
    t.insert(ConstanteNommee::Pi, pi());
    t.insert(ConstanteNommee::E, e_construit());
    for n in PETITS_ENTIERS {
        t.insert(ConstanteNommee::Racine(n), Cr::entier(BigInt::from(n)).sqrt());
    }
    for n in [2u32, 3, 5, 7] {
        if let Some(c) = ln_petit_entier(n) {
            t.insert(ConstanteNommee::Ln(n as u8), c);
        }
    }
    let ln2 = t.get(&ConstanteNommee::Ln(2)).cloned();
    let ln3 = t.get(&ConstanteNommee::Ln(3)).cloned();
    let ln5 = t.get(&ConstanteNommee::Ln(5)).cloned();
    if let (Some(ln2), Some(ln3), Some(ln5)) = (ln2, ln3, ln5) {
        t.insert(ConstanteNommee::Ln(6), ln2.add(&ln3));
        t.insert(ConstanteNommee::Ln(10), ln2.add(&ln5));
    }
    t
}
