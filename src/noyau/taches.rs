// src/noyau/taches.rs
//
// Exécution des évaluations en arrière-plan
// -----------------------------------------
// - Horloge : source du temps pour les échéances (système, ou manuelle en test)
// - Ordonnanceur : lance un travail (thread dédié, ou file manuelle en test)
// - Tache : poignée d'une évaluation (identifiant unique, drapeau d'annulation, échéance)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

/* ------------------------ Horloge ------------------------ */

pub trait Horloge: Send + Sync {
    fn maintenant(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HorlogeSysteme;

impl Horloge for HorlogeSysteme {
    fn maintenant(&self) -> Instant {
        Instant::now()
    }
}

/// Horloge qui n'avance que sur demande.
#[derive(Debug)]
pub struct HorlogeManuelle {
    origine: Instant,
    ecoule: Mutex<Duration>,
}

impl Default for HorlogeManuelle {
    fn default() -> Self {
        Self {
            origine: Instant::now(),
            ecoule: Mutex::new(Duration::ZERO),
        }
    }
}

impl HorlogeManuelle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avancer(&self, d: Duration) {
        if let Ok(mut e) = self.ecoule.lock() {
            *e += d;
        }
    }
}

impl Horloge for HorlogeManuelle {
    fn maintenant(&self) -> Instant {
        let e = self.ecoule.lock().map(|e| *e).unwrap_or_default();
        self.origine + e
    }
}

/* ------------------------ Ordonnanceur ------------------------ */

pub type Travail = Box<dyn FnOnce() + Send + 'static>;

pub trait Ordonnanceur: Send + Sync {
    fn lancer(&self, nom: String, travail: Travail);
}

/// Un thread par évaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrdonnanceurThreads;

impl Ordonnanceur for OrdonnanceurThreads {
    fn lancer(&self, nom: String, travail: Travail) {
        // le travail n'est rendu qu'en cas d'échec du lancement
        let travail = Arc::new(Mutex::new(Some(travail)));
        let pour_thread = Arc::clone(&travail);
        let lance = thread::Builder::new().name(nom.clone()).spawn(move || {
            let t = pour_thread.lock().ok().and_then(|mut t| t.take());
            if let Some(t) = t {
                t();
            }
        });
        if let Err(e) = lance {
            warn!(tache = %nom, erreur = %e, "thread indisponible, exécution immédiate");
            let t = travail.lock().ok().and_then(|mut t| t.take());
            if let Some(t) = t {
                t();
            }
        }
    }
}

/// File de travaux exécutés explicitement (tests déterministes).
#[derive(Default)]
pub struct OrdonnanceurManuel {
    file: Mutex<VecDeque<(String, Travail)>>,
}

impl OrdonnanceurManuel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn en_attente(&self) -> usize {
        self.file.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Exécute le plus ancien travail ; false si la file est vide.
    pub fn executer_un(&self) -> bool {
        let suivant = self.file.lock().ok().and_then(|mut f| f.pop_front());
        match suivant {
            Some((_, t)) => {
                t();
                true
            }
            None => false,
        }
    }

    pub fn executer_tout(&self) -> usize {
        let mut n = 0;
        while self.executer_un() {
            n += 1;
        }
        n
    }
}

impl Ordonnanceur for OrdonnanceurManuel {
    fn lancer(&self, nom: String, travail: Travail) {
        if let Ok(mut f) = self.file.lock() {
            f.push_back((nom, travail));
        }
    }
}

/* ------------------------ Poignée de tâche ------------------------ */

static PROCHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Évaluation en cours pour un emplacement.
#[derive(Debug)]
pub struct Tache {
    pub id: u64,
    pub drapeau: Arc<AtomicBool>,
    /// Échéance (évaluations initiales seulement).
    pub echeance: Option<Instant>,
}

impl Tache {
    pub fn new(echeance: Option<Instant>) -> Self {
        Self {
            id: PROCHAIN_ID.fetch_add(1, Ordering::Relaxed),
            drapeau: Arc::new(AtomicBool::new(false)),
            echeance,
        }
    }

    pub fn annuler(&self) {
        self.drapeau.store(true, Ordering::SeqCst);
    }

    pub fn annulee(&self) -> bool {
        self.drapeau.load(Ordering::SeqCst)
    }

    pub fn expiree(&self, maintenant: Instant) -> bool {
        self.echeance.is_some_and(|e| maintenant >= e)
    }
}
