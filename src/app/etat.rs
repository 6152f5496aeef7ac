//! src/app/etat.rs
//!
//! État du terminal (sans rendu).
//!
//! Rôle : piloter le moteur comme le ferait un clavier de calculatrice
//! (saisie, "=", mémoire, mode d'angle) et retenir ce qu'il faut afficher.
//!
//! Contrats :
//! - Aucune arithmétique ici : tout passe par `Moteur`.
//! - Le terminal attend les résultats (`Moteur::attendre`) ; le moteur, lui, ne bloque jamais.
//! - Bornes sur la largeur d'affichage.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use calculatrice_exacte::noyau::erreurs::{CalcError, ErrorKind, Resultat};
use calculatrice_exacte::noyau::format::MetriquesTerminal;
use calculatrice_exacte::noyau::jetons::{touches, Touche};
use calculatrice_exacte::noyau::lecture::{LSD_INFINI, LSD_ZERO};
use calculatrice_exacte::noyau::moteur::{Evenement, Journal, Moteur, Rappel, MAIN_INDEX};

/// Largeur d'affichage par défaut (en chiffres).
const CHIFFRES_DEFAUT: i32 = 40;

/// Garde-fou : largeur bornée.
const CHIFFRES_MAX: i32 = 2_000;

/// Défilement maximal vers la droite pour un développement infini.
const DEFILEMENT_MAX: i32 = 10_000_000;

/// Messages du moteur destinés à l'utilisateur.
#[derive(Debug, Default)]
pub struct RappelTerminal {
    messages: RefCell<Vec<String>>,
    pub delai_propose: RefCell<bool>,
}

impl RappelTerminal {
    pub fn vider(&self) -> Vec<String> {
        self.messages.take()
    }
}

impl Rappel for RappelTerminal {
    fn show_timeout_dialog(&self, long_timeout: bool) {
        let mut m = "Calcul trop long.".to_string();
        if !long_timeout {
            m.push_str(" Tapez :long puis = pour prolonger le délai.");
            *self.delai_propose.borrow_mut() = true;
        }
        self.messages.borrow_mut().push(m);
    }

    fn show_cancelled(&self) {
        self.messages.borrow_mut().push("Calcul annulé.".into());
    }

    fn on_memory_state_changed(&self) {
        debug!("mémoire modifiée");
    }
}

/// Résultat affiché : où il en est et jusqu'où on peut défiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lecture {
    pub index: i64,
    pub prec_offset: i32,
    pub max_prec_offset: i32,
}

pub struct AppCalc {
    pub moteur: Moteur,
    pub journal: Rc<Journal>,
    pub rappel: Rc<RappelTerminal>,
    pub metriques: Arc<MetriquesTerminal>,

    // --- sorties ---
    pub lecture: Option<Lecture>,
    pub erreur: String,
    pub messages: Vec<String>,

    /// Index d'historique du dernier "=", tant qu'aucune touche n'a suivi.
    pub apres_egal: Option<i64>,
    pub historique: Vec<i64>,
}

impl AppCalc {
    pub fn new(moteur: Moteur, chiffres: Option<i32>) -> Self {
        let colonnes = chiffres.unwrap_or(CHIFFRES_DEFAUT).clamp(8, CHIFFRES_MAX);
        let rappel = Rc::new(RappelTerminal::default());
        let mut moteur = moteur;
        moteur.set_rappel(rappel.clone());
        Self {
            moteur,
            journal: Rc::new(Journal::new()),
            rappel,
            metriques: Arc::new(MetriquesTerminal { colonnes }),
            lecture: None,
            erreur: String::new(),
            messages: Vec::new(),
            apres_egal: None,
            historique: Vec::new(),
        }
    }

    pub fn colonnes(&self) -> i32 {
        self.metriques.colonnes
    }

    /* ------------------------ Saisie ------------------------ */

    /// Tape le texte comme une suite de touches ; renvoie le nombre de touches refusées.
    pub fn saisir(&mut self, texte: &str) -> Resultat<usize> {
        let suite = touches(texte)?;
        if suite.is_empty() {
            return Ok(0);
        }
        if let Some(h) = self.apres_egal.take() {
            // un opérateur binaire continue le calcul, le reste repart de zéro
            match suite.first() {
                Some(Touche::Op(op)) if op.is_binary() => self.moteur.collapse(h)?,
                _ => self.moteur.clear_main(),
            }
        }
        self.lecture = None;
        self.erreur.clear();
        let mut refusees = 0;
        for t in suite {
            let accepte = match t {
                Touche::Op(op) => self.moteur.append(op),
                Touche::Exposant(e) => self.moteur.add_exponent(e),
            };
            if !accepte {
                refusees += 1;
            }
        }
        Ok(refusees)
    }

    /// Efface la dernière touche.
    pub fn effacer(&mut self) {
        self.apres_egal = None;
        self.lecture = None;
        self.moteur.delete();
    }

    pub fn tout_effacer(&mut self) {
        self.apres_egal = None;
        self.lecture = None;
        self.erreur.clear();
        self.moteur.cancel(MAIN_INDEX, true);
        self.moteur.clear_main();
    }

    pub fn set_degres(&mut self, degres: bool) {
        self.moteur.set_degree_mode(degres);
    }

    /// Délai long accordé pour le prochain "=".
    pub fn prolonger(&mut self) {
        self.moteur.set_long_timeout();
        *self.rappel.delai_propose.borrow_mut() = false;
    }

    /* ------------------------ Évaluation ------------------------ */

    /// Aperçu pendant la saisie ; rien en cas d'erreur ou de délai.
    pub fn apercu(&mut self) -> Resultat<()> {
        if self.moteur.is_empty() {
            return Ok(());
        }
        self.moteur
            .evaluate_and_notify(MAIN_INDEX, self.journal.clone(), self.metriques.clone())?;
        self.moteur.attendre(MAIN_INDEX);
        self.consommer(false);
        Ok(())
    }

    /// "=" : évaluation demandée, puis archivage dans l'historique.
    pub fn egal(&mut self) -> Resultat<()> {
        if self.moteur.is_empty() {
            return Ok(());
        }
        if let Some(h) = self.apres_egal {
            // "=" répété : rien de neuf à calculer
            self.lecture = Some(Lecture {
                index: h,
                prec_offset: self.lecture.as_ref().map_or(-1, |l| l.prec_offset),
                max_prec_offset: self.lecture.as_ref().map_or(DEFILEMENT_MAX, |l| l.max_prec_offset),
            });
            return Ok(());
        }
        self.moteur.remove_trailing_additive_operators();
        self.moteur
            .require_result(MAIN_INDEX, self.journal.clone(), self.metriques.clone())?;
        self.moteur.attendre(MAIN_INDEX);
        if self.consommer(true) {
            let h = self.moteur.preserve(MAIN_INDEX, true)?;
            self.moteur.copy_main_to_history()?;
            self.historique.push(h);
            self.apres_egal = Some(h);
        }
        Ok(())
    }

    /// Vide le journal ; true si la principale a été évaluée.
    fn consommer(&mut self, requis: bool) -> bool {
        let mut evalue = false;
        for e in self.journal.vider() {
            match e {
                Evenement::Evalue {
                    index,
                    init_prec_offset,
                    lsd_offset,
                    ..
                } if index == MAIN_INDEX => {
                    evalue = true;
                    self.erreur.clear();
                    self.lecture = Some(Lecture {
                        index,
                        prec_offset: init_prec_offset,
                        max_prec_offset: max_defilement(lsd_offset),
                    });
                }
                Evenement::Erreur { kind, .. } if requis || kind != ErrorKind::TimedOut => {
                    if requis {
                        self.erreur = kind.message().to_string();
                    }
                    self.lecture = None;
                }
                autre => debug!(?autre, "notification ignorée"),
            }
        }
        self.messages.extend(self.rappel.vider());
        evalue
    }

    /// Décale l'affichage de `n` chiffres vers la droite.
    pub fn plus(&mut self, n: i32) {
        if let Some(l) = &mut self.lecture {
            l.prec_offset = l.prec_offset.saturating_add(n).min(l.max_prec_offset);
        }
    }

    /* ------------------------ Mémoire ------------------------ */

    /// La principale doit être évaluée avant d'être copiée.
    fn principale_evaluee(&mut self) -> Resultat<i64> {
        if let Some(h) = self.apres_egal {
            return Ok(h);
        }
        self.egal()?;
        self.apres_egal
            .ok_or_else(|| CalcError::syntax("expression sans valeur"))
    }

    fn attendre_memoire(&mut self) {
        let index = self.moteur.max_index();
        self.moteur.attendre(index);
        self.journal.vider();
    }

    pub fn memoire_plus(&mut self) -> Resultat<()> {
        let h = self.principale_evaluee()?;
        self.moteur.add_to_memory(h)?;
        self.attendre_memoire();
        Ok(())
    }

    pub fn memoire_moins(&mut self) -> Resultat<()> {
        let h = self.principale_evaluee()?;
        self.moteur.subtract_from_memory(h)?;
        self.attendre_memoire();
        Ok(())
    }

    /// Rappel mémoire : ajoute une référence à la valeur en mémoire.
    pub fn memoire_rappel(&mut self) -> Resultat<()> {
        let m = self.moteur.memory_index();
        if m == 0 {
            return Ok(());
        }
        if self.apres_egal.take().is_some() {
            self.moteur.clear_main();
        }
        self.lecture = None;
        self.moteur.append_expr(m)
    }
}

/// Position la plus à droite utile : dernier chiffre d'un décimal fini.
fn max_defilement(lsd_offset: i32) -> i32 {
    match lsd_offset {
        LSD_INFINI => DEFILEMENT_MAX,
        LSD_ZERO => -1,
        lsd => lsd.max(-1),
    }
}
