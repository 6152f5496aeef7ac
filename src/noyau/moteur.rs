// src/noyau/moteur.rs
//
// Moteur d'évaluation asynchrone
// ------------------------------
// - Un emplacement par index : 0 = principale (modifiable), -1 = copie pour l'historique,
//   les autres sont immuables et viennent du stockage.
// - Au plus une tâche par emplacement ; une tâche évalue un instantané (Arc) de l'expression.
// - Les tâches renvoient leur résultat par un canal flume ; le fil interactif les reçoit
//   dans `traiter_evenements` / `attendre`, où sont aussi vérifiées les échéances.
// - Un résultat dont l'identifiant n'est plus celui de la tâche courante est ignoré.
//
// Valeur exacte : écrite une seule fois (OnceLock, premier écrivain gagnant).
// Chaîne décimale, décalages, MSD : propriété exclusive du fil interactif.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::config::MoteurConfig;
use super::erreurs::{CalcError, ErrorKind, Resultat};
use super::eval::{eval, ExprResolver};
use super::expr::Expression;
use super::format::{preferred_prec, short_string, CharMetricsInfo, MetriquesTerminal};
use super::jetons::Opcode;
use super::lecture::{exposant_depuis_texte, lsd_offset, msd_index_of, unflip_zeroes, MSD_INVALIDE};
use super::reel::UnifiedReal;
use super::reel_constructif::installer_interruption;
use super::stockage::{horodatage, ExpressionStore, StoredRow};
use super::taches::{Horloge, HorlogeSysteme, Ordonnanceur, OrdonnanceurThreads, Tache};

pub const MAIN_INDEX: i64 = 0;
pub const HISTORY_MAIN_INDEX: i64 = -1;

/// Marge de chiffres ajoutée quand le MSD n'a pas été trouvé à la précision initiale.
const MARGE_MSD: i32 = 30;

/// Pas maximal d'attente dans `attendre`, pour revérifier les échéances.
const ATTENTE_MAX: Duration = Duration::from_millis(50);

pub fn is_mutable_index(index: i64) -> bool {
    index == MAIN_INDEX || index == HISTORY_MAIN_INDEX
}

/* ------------------------ Interfaces vers l'affichage ------------------------ */

/// Notifications d'évaluation, toujours délivrées sur le fil interactif.
pub trait EvaluationListener {
    fn on_evaluate(
        &self,
        index: i64,
        init_prec_offset: i32,
        msd_index: i32,
        lsd_offset: i32,
        truncated_whole_part: &str,
    );
    fn on_error(&self, index: i64, kind: ErrorKind);
    fn on_cancelled(&self, index: i64);
    fn on_reevaluate(&self, index: i64);
}

/// Messages "hors résultat" destinés à l'utilisateur.
pub trait Rappel {
    /// Délai dépassé sur une évaluation demandée ; prolongation possible si !long_timeout.
    fn show_timeout_dialog(&self, _long_timeout: bool) {}
    fn show_cancelled(&self) {}
    fn on_memory_state_changed(&self) {}
}

/// Notification enregistrée par `Journal`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Evenement {
    Evalue {
        index: i64,
        init_prec_offset: i32,
        msd_index: i32,
        lsd_offset: i32,
        partie_entiere: String,
    },
    Erreur {
        index: i64,
        kind: ErrorKind,
    },
    Annule {
        index: i64,
    },
    Reevalue {
        index: i64,
    },
}

/// Écouteur qui se contente d'empiler les notifications.
#[derive(Debug, Default)]
pub struct Journal {
    evenements: std::cell::RefCell<Vec<Evenement>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vider(&self) -> Vec<Evenement> {
        self.evenements.take()
    }

    pub fn len(&self) -> usize {
        self.evenements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pousser(&self, e: Evenement) {
        self.evenements.borrow_mut().push(e);
    }
}

impl EvaluationListener for Journal {
    fn on_evaluate(
        &self,
        index: i64,
        init_prec_offset: i32,
        msd_index: i32,
        lsd_offset: i32,
        truncated_whole_part: &str,
    ) {
        self.pousser(Evenement::Evalue {
            index,
            init_prec_offset,
            msd_index,
            lsd_offset,
            partie_entiere: truncated_whole_part.to_string(),
        });
    }

    fn on_error(&self, index: i64, kind: ErrorKind) {
        self.pousser(Evenement::Erreur { index, kind });
    }

    fn on_cancelled(&self, index: i64) {
        self.pousser(Evenement::Annule { index });
    }

    fn on_reevaluate(&self, index: i64) {
        self.pousser(Evenement::Reevalue { index });
    }
}

/// Chiffres à afficher, renvoyés par `get_string`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Affichage {
    /// Chiffres (et point), complétés par des espaces pour ceux pas encore calculés.
    pub chiffres: String,
    /// Décalage effectivement retenu (borné).
    pub prec_offset: i32,
    /// Des chiffres significatifs sont coupés à gauche.
    pub tronque: bool,
    pub negatif: bool,
}

impl Affichage {
    fn vide(prec_offset: i32) -> Self {
        Self {
            chiffres: " ".to_string(),
            prec_offset,
            tronque: false,
            negatif: false,
        }
    }
}

/* ------------------------ État partagé avec les tâches ------------------------ */

/// Expression immuable d'un emplacement, et sa valeur écrite une seule fois.
#[derive(Debug)]
struct Entree {
    expr: Arc<Expression>,
    degres: bool,
    long_timeout: bool,
    timestamp: i64,
    valeur: OnceLock<UnifiedReal>,
}

impl Entree {
    fn new(expr: Expression, degres: bool, long_timeout: bool, timestamp: i64) -> Self {
        Self {
            expr: Arc::new(expr),
            degres,
            long_timeout,
            timestamp,
            valeur: OnceLock::new(),
        }
    }
}

struct Partage {
    entrees: Mutex<HashMap<i64, Arc<Entree>>>,
    store: Arc<dyn ExpressionStore>,
}

impl Partage {
    fn verrou(&self) -> MutexGuard<'_, HashMap<i64, Arc<Entree>>> {
        self.entrees.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entrée de l'index, chargée depuis le stockage au premier accès.
    fn entree(&self, index: i64) -> Resultat<Arc<Entree>> {
        if let Some(e) = self.verrou().get(&index) {
            return Ok(Arc::clone(e));
        }
        if is_mutable_index(index) {
            return Err(CalcError::syntax(format!("emplacement {index} vide")));
        }
        let ligne = self.store.get_row(index)?;
        let expr = Expression::from_bytes(&ligne.expression)?;
        let entree = Entree::new(expr, ligne.degree_mode, ligne.long_timeout, ligne.timestamp);
        debug!(index, "expression chargée depuis le stockage");
        let mut entrees = self.verrou();
        Ok(Arc::clone(
            entrees.entry(index).or_insert_with(|| Arc::new(entree)),
        ))
    }

    fn installer(&self, index: i64, entree: Entree) -> Arc<Entree> {
        let entree = Arc::new(entree);
        self.verrou().insert(index, Arc::clone(&entree));
        entree
    }

    fn vider(&self) {
        self.verrou().clear();
    }
}

impl ExprResolver for Partage {
    fn get_expr(&self, index: i64) -> Resultat<Arc<Expression>> {
        Ok(Arc::clone(&self.entree(index)?.expr))
    }

    fn get_degree_mode(&self, index: i64) -> bool {
        self.entree(index).is_ok_and(|e| e.degres)
    }

    fn get_result(&self, index: i64) -> Option<UnifiedReal> {
        self.entree(index).ok()?.valeur.get().cloned()
    }

    fn put_result_if_absent(&self, index: i64, valeur: UnifiedReal) -> UnifiedReal {
        match self.entree(index) {
            Ok(e) => e.valeur.get_or_init(|| valeur).clone(),
            Err(_) => valeur,
        }
    }
}

/* ------------------------ Tâches de fond ------------------------ */

struct Initial {
    val: UnifiedReal,
    chaine: String,
    prec: i32,
    init_display: i32,
}

enum Contenu {
    Initial(Resultat<Initial>),
    Reevalue(Resultat<(String, i32)>),
}

struct Message {
    index: i64,
    id: u64,
    contenu: Contenu,
}

/// Évaluation initiale : valeur exacte, borne de taille, puis troncature
/// à une précision qui permet de situer le premier chiffre significatif.
fn calcul_initial(
    entree: &Entree,
    resolver: &dyn ExprResolver,
    requis: bool,
    cm: &dyn CharMetricsInfo,
    cfg: &MoteurConfig,
    drapeau: &AtomicBool,
) -> Resultat<Initial> {
    let val = match entree.valeur.get() {
        Some(v) => v.clone(),
        None => {
            let v = eval(&entree.expr, entree.degres, resolver)?;
            entree.valeur.get_or_init(|| v).clone()
        }
    };
    if drapeau.load(Ordering::SeqCst) {
        return Err(CalcError::Aborted);
    }
    if val.approx_whole_number_bits_greater_than(cfg.max_result_bits(requis, entree.long_timeout))? {
        return Err(CalcError::TimedOut);
    }

    let mut prec = cfg.init_prec;
    let mut chaine = val.to_string_truncated(prec)?;
    let mut msd = msd_index_of(&chaine);
    if msd == MSD_INVALIDE {
        let zeros = val.leading_binary_zeroes();
        prec = if zeros < cfg.quick_max_result_bits {
            MARGE_MSD + (std::f64::consts::LOG10_2 * f64::from(zeros)).ceil() as i32
        } else {
            cfg.max_msd_prec_offset
        };
        chaine = val.to_string_truncated(prec)?;
        msd = msd_index_of(&chaine);
        if msd == MSD_INVALIDE && zeros < cfg.quick_max_result_bits {
            error!(prec, "aucun chiffre significatif malgré un minorant fiable");
        }
    }
    let point = chaine.find('.').unwrap_or(chaine.len());
    let lsd = lsd_offset(&val, &chaine, point);
    let init_display = preferred_prec(&chaine, msd, lsd, cm, cfg);
    let voulu = init_display.saturating_add(cfg.extra_digits);
    if voulu > prec {
        prec = voulu;
        chaine = val.to_string_truncated(prec)?;
    }
    Ok(Initial {
        val,
        chaine,
        prec,
        init_display,
    })
}

/* ------------------------ État du fil interactif ------------------------ */

#[derive(Clone, Debug, PartialEq, Eq)]
enum Cache {
    Absent,
    /// Dernière évaluation demandée en erreur.
    Errone,
    Chaine(String),
}

#[derive(Clone)]
enum Destinataire {
    Ecouteur(Rc<dyn EvaluationListener>),
    /// Fixe l'index de la mémoire une fois la valeur connue.
    Memoire,
}

enum Genre {
    Initiale {
        requis: bool,
        quiet: bool,
        long_timeout: bool,
        metriques: Arc<dyn CharMetricsInfo>,
    },
    Reevaluation,
}

struct EnCours {
    tache: Tache,
    genre: Genre,
    dest: Destinataire,
}

struct Emplacement {
    cache: Cache,
    /// Chiffres après le point dans `cache`.
    offset: i32,
    /// Précision demandée (en cours de calcul ou obtenue).
    offset_req: i32,
    msd: i32,
    tache: Option<EnCours>,
}

impl Default for Emplacement {
    fn default() -> Self {
        Self {
            cache: Cache::Absent,
            offset: 0,
            offset_req: 0,
            msd: MSD_INVALIDE,
            tache: None,
        }
    }
}

impl Emplacement {
    fn chaine(&self) -> Option<&str> {
        match &self.cache {
            Cache::Chaine(s) => Some(s),
            _ => None,
        }
    }
}

/* ------------------------ Moteur ------------------------ */

pub struct Moteur {
    cfg: MoteurConfig,
    partage: Arc<Partage>,
    emplacements: HashMap<i64, Emplacement>,

    principal: Expression,
    degres: bool,
    long_timeout: bool,
    /// L'expression principale a changé depuis la dernière évaluation.
    changed_value: bool,
    memory_index: i64,

    horloge: Arc<dyn Horloge>,
    ordonnanceur: Arc<dyn Ordonnanceur>,
    rappel: Option<Rc<dyn Rappel>>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Moteur {
    pub fn new(
        cfg: MoteurConfig,
        store: Arc<dyn ExpressionStore>,
        horloge: Arc<dyn Horloge>,
        ordonnanceur: Arc<dyn Ordonnanceur>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let mut m = Self {
            cfg,
            partage: Arc::new(Partage {
                entrees: Mutex::new(HashMap::new()),
                store,
            }),
            emplacements: HashMap::new(),
            principal: Expression::new(),
            degres: false,
            long_timeout: false,
            changed_value: false,
            memory_index: 0,
            horloge,
            ordonnanceur,
            rappel: None,
            tx,
            rx,
        };
        m.clear_main_cache();
        m
    }

    /// Horloge système, un thread par évaluation.
    pub fn avec_defauts(cfg: MoteurConfig, store: Arc<dyn ExpressionStore>) -> Self {
        Self::new(cfg, store, Arc::new(HorlogeSysteme), Arc::new(OrdonnanceurThreads))
    }

    pub fn set_rappel(&mut self, rappel: Rc<dyn Rappel>) {
        self.rappel = Some(rappel);
    }

    pub fn config(&self) -> &MoteurConfig {
        &self.cfg
    }

    fn emplacement(&mut self, index: i64) -> &mut Emplacement {
        self.emplacements.entry(index).or_default()
    }

    /* ---- Édition de l'expression principale ---- */

    pub fn main_expr(&self) -> &Expression {
        &self.principal
    }

    pub fn append(&mut self, op: Opcode) -> bool {
        if op == Opcode::TenPow {
            self.changed_value = true;
        } else {
            self.changed_value = self.changed_value || !op.is_binary();
        }
        self.principal.add(op)
    }

    pub fn add_exponent(&mut self, exp: i32) -> bool {
        self.changed_value = true;
        self.principal.add_exponent(exp)
    }

    /// Exposant collé sous forme de texte ("E-12" entre `debut` et `fin`).
    pub fn add_exponent_from_text(&mut self, s: &str, debut: usize, fin: usize) -> bool {
        self.add_exponent(exposant_depuis_texte(s, debut, fin))
    }

    pub fn delete(&mut self) {
        self.changed_value = true;
        self.principal.delete();
        if self.principal.is_empty() {
            self.long_timeout = false;
        }
    }

    pub fn remove_trailing_additive_operators(&mut self) {
        self.principal.remove_trailing_additive_operators();
    }

    pub fn is_empty(&self) -> bool {
        self.principal.is_empty()
    }

    pub fn has_trailing_constant(&self) -> bool {
        self.principal.has_trailing_constant()
    }

    pub fn has_trailing_binary_op(&self) -> bool {
        self.principal.has_trailing_binary_op()
    }

    pub fn has_trig_funcs(&self) -> bool {
        self.principal.has_trig_funcs()
    }

    pub fn set_degree_mode(&mut self, degres: bool) {
        self.changed_value = true;
        self.degres = degres;
    }

    pub fn degree_mode(&self) -> bool {
        self.degres
    }

    /// Prolongation du délai accordée par l'utilisateur.
    pub fn set_long_timeout(&mut self) {
        self.long_timeout = true;
    }

    pub fn long_timeout(&self) -> bool {
        self.long_timeout
    }

    /// Force une réévaluation de la principale.
    pub fn touch(&mut self) {
        self.changed_value = true;
    }

    /// Les tâches en vol gardent l'ancien instantané ; leur valeur n'est plus visible.
    fn nouvel_instantane_principal(&self) {
        let entree = Entree::new(self.principal.clone(), self.degres, self.long_timeout, 0);
        self.partage.installer(MAIN_INDEX, entree);
    }

    /// Nouvel instantané vide pour la principale ; la tâche éventuelle est abandonnée.
    fn clear_main_cache(&mut self) {
        self.nouvel_instantane_principal();
        let slot = self.emplacement(MAIN_INDEX);
        if let Some(en_cours) = slot.tache.take() {
            en_cours.tache.annuler();
            debug!(id = en_cours.tache.id, "tâche abandonnée avec le cache principal");
        }
        *slot = Emplacement::default();
    }

    pub fn clear_main(&mut self) {
        self.principal.clear();
        self.long_timeout = false;
        self.clear_main_cache();
    }

    /// Oublie tout : historique, mémoire, stockage.
    pub fn clear_everything(&mut self) {
        self.cancel_all(true);
        self.partage.store.erase_all();
        self.partage.vider();
        self.emplacements.clear();
        self.set_memory_index(0);
        self.principal.clear();
        self.long_timeout = false;
        self.changed_value = false;
        self.clear_main_cache();
        info!("historique et mémoire effacés");
    }

    /* ---- Évaluation ---- */

    /// Évaluation spéculative : silencieuse en cas de délai dépassé.
    pub fn evaluate_and_notify(
        &mut self,
        index: i64,
        listener: Rc<dyn EvaluationListener>,
        metriques: Arc<dyn CharMetricsInfo>,
    ) -> Resultat<()> {
        if metriques.max_chars() == 0 {
            return Ok(());
        }
        if !is_mutable_index(index) {
            self.partage.entree(index)?;
        }
        let changee = index == MAIN_INDEX && self.changed_value;
        let (connu, occupe) = {
            let slot = self.emplacement(index);
            (slot.chaine().is_some(), slot.tache.is_some())
        };
        if connu && !changee {
            self.notify_immediately(index, &Destinataire::Ecouteur(listener), metriques.as_ref());
        } else if !occupe {
            self.evaluate_result(index, Destinataire::Ecouteur(listener), metriques, false)?;
        }
        Ok(())
    }

    /// Évaluation demandée par l'utilisateur ("=").
    pub fn require_result(
        &mut self,
        index: i64,
        listener: Rc<dyn EvaluationListener>,
        metriques: Arc<dyn CharMetricsInfo>,
    ) -> Resultat<()> {
        self.require_result_pour(index, Destinataire::Ecouteur(listener), metriques)
    }

    fn require_result_pour(
        &mut self,
        index: i64,
        dest: Destinataire,
        metriques: Arc<dyn CharMetricsInfo>,
    ) -> Resultat<()> {
        if !is_mutable_index(index) {
            self.partage.entree(index)?;
        }
        let changee = index == MAIN_INDEX && self.changed_value;
        let (cache, requis_en_cours) = {
            let slot = self.emplacement(index);
            let requis = matches!(
                slot.tache,
                Some(EnCours { genre: Genre::Initiale { requis: true, .. }, .. })
            );
            let cache = match slot.cache {
                Cache::Absent => Cache::Absent,
                Cache::Errone => Cache::Errone,
                // la chaîne elle-même n'est pas utile ici
                Cache::Chaine(_) => Cache::Chaine(String::new()),
            };
            (cache, requis)
        };
        match cache {
            Cache::Chaine(_) if !changee => {
                self.notify_immediately(index, &dest, metriques.as_ref());
            }
            Cache::Errone => {
                self.cancel(index, true);
                self.evaluate_result(index, dest, metriques, true)?;
            }
            _ => {
                if index == HISTORY_MAIN_INDEX {
                    self.signaler_annulation(&dest, index);
                } else if !requis_en_cours {
                    self.cancel(index, true);
                    self.evaluate_result(index, dest, metriques, true)?;
                }
            }
        }
        Ok(())
    }

    fn evaluate_result(
        &mut self,
        index: i64,
        dest: Destinataire,
        metriques: Arc<dyn CharMetricsInfo>,
        requis: bool,
    ) -> Resultat<()> {
        if index == MAIN_INDEX {
            self.clear_main_cache();
        }
        let entree = self.partage.entree(index)?;
        let principal = index == MAIN_INDEX;
        let long_timeout = entree.long_timeout;
        let delai = self.cfg.delai(requis, long_timeout, principal);
        let tache = Tache::new(Some(self.horloge.maintenant() + delai));
        debug!(index, requis, id = tache.id, ?delai, "évaluation initiale lancée");

        let travail = {
            let partage = Arc::clone(&self.partage);
            let cfg = self.cfg.clone();
            let metriques = Arc::clone(&metriques);
            let drapeau = Arc::clone(&tache.drapeau);
            let tx = self.tx.clone();
            let id = tache.id;
            move || {
                let _garde = installer_interruption(Arc::clone(&drapeau));
                let r = calcul_initial(&entree, &*partage, requis, &*metriques, &cfg, &drapeau);
                // le moteur peut avoir disparu entre-temps
                let _ = tx.send(Message {
                    index,
                    id,
                    contenu: Contenu::Initial(r),
                });
            }
        };
        self.emplacement(index).tache = Some(EnCours {
            tache,
            genre: Genre::Initiale {
                requis,
                quiet: !requis || !principal,
                long_timeout,
                metriques,
            },
            dest,
        });
        self.ordonnanceur.lancer(format!("eval-{index}"), Box::new(travail));
        if principal {
            self.changed_value = false;
        }
        Ok(())
    }

    /// Garantit (à terme) au moins `prec` chiffres après le point dans le cache.
    fn ensure_cache_prec(&mut self, index: i64, prec: i32, dest: Destinataire) {
        let Some(val) = self.get_result(index) else {
            return;
        };
        let (chiffres_sup, diviseur) = (self.cfg.precompute_digits, self.cfg.precompute_divisor);
        let demande = {
            let slot = self.emplacement(index);
            if (slot.chaine().is_some() && slot.offset >= prec) || slot.offset_req >= prec {
                return;
            }
            // l'évaluation initiale remplira le cache et notifiera l'écouteur
            if matches!(slot.tache, Some(EnCours { genre: Genre::Initiale { .. }, .. })) {
                return;
            }
            if let Some(en_cours) = slot.tache.take() {
                en_cours.tache.annuler();
            }
            let mut demande = prec.saturating_add(chiffres_sup);
            if slot.chaine().is_some() {
                demande = demande.saturating_add(demande / diviseur);
            }
            demande
        };
        let tache = Tache::new(None);
        debug!(index, prec = demande, id = tache.id, "réévaluation lancée");

        let travail = {
            let drapeau = Arc::clone(&tache.drapeau);
            let tx = self.tx.clone();
            let id = tache.id;
            move || {
                let _garde = installer_interruption(drapeau);
                let r = val.to_string_truncated(demande).map(|s| (s, demande));
                let _ = tx.send(Message {
                    index,
                    id,
                    contenu: Contenu::Reevalue(r),
                });
            }
        };
        let slot = self.emplacement(index);
        slot.offset_req = demande;
        slot.tache = Some(EnCours {
            tache,
            genre: Genre::Reevaluation,
            dest,
        });
        self.ordonnanceur.lancer(format!("reeval-{index}"), Box::new(travail));
    }

    /* ---- Réception des résultats ---- */

    /// Délivre les résultats arrivés et applique les échéances dépassées.
    /// Renvoie le nombre de messages reçus (périmés compris).
    pub fn traiter_evenements(&mut self) -> usize {
        let mut n = 0;
        while let Ok(m) = self.rx.try_recv() {
            self.recevoir(m);
            n += 1;
        }
        self.verifier_echeances();
        n
    }

    /// Bloque jusqu'à ce que l'emplacement n'ait plus de tâche.
    ///
    /// Avec un ordonnanceur manuel, les travaux doivent avoir été exécutés avant.
    pub fn attendre(&mut self, index: i64) {
        loop {
            self.traiter_evenements();
            if !self.evaluation_in_progress(index) {
                return;
            }
            let maintenant = self.horloge.maintenant();
            let attente = self
                .prochaine_echeance()
                .map_or(ATTENTE_MAX, |e| e.saturating_duration_since(maintenant))
                .min(ATTENTE_MAX);
            match self.rx.recv_timeout(attente) {
                Ok(m) => self.recevoir(m),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn prochaine_echeance(&self) -> Option<std::time::Instant> {
        self.emplacements
            .values()
            .filter_map(|s| s.tache.as_ref().and_then(|t| t.tache.echeance))
            .min()
    }

    fn verifier_echeances(&mut self) {
        let maintenant = self.horloge.maintenant();
        let expires: Vec<i64> = self
            .emplacements
            .iter()
            .filter(|(_, s)| s.tache.as_ref().is_some_and(|t| t.tache.expiree(maintenant)))
            .map(|(i, _)| *i)
            .collect();
        for index in expires {
            let Some(en_cours) = self.emplacement(index).tache.take() else {
                continue;
            };
            en_cours.tache.annuler();
            if index == MAIN_INDEX {
                self.changed_value = true;
                self.nouvel_instantane_principal();
            }
            if let Genre::Initiale {
                requis,
                long_timeout,
                ..
            } = en_cours.genre
            {
                warn!(index, requis, "délai dépassé, évaluation annulée");
                self.expiration(index, requis, long_timeout, &en_cours.dest);
            }
        }
    }

    /// Délai dépassé ou résultat trop grand : même traitement.
    fn expiration(&mut self, index: i64, requis: bool, long_timeout: bool, dest: &Destinataire) {
        if requis && index == MAIN_INDEX {
            if let Some(r) = &self.rappel {
                r.show_timeout_dialog(long_timeout);
            }
            self.signaler_erreur(dest, index, ErrorKind::TimedOut);
        } else {
            self.signaler_annulation(dest, index);
        }
    }

    fn recevoir(&mut self, m: Message) {
        let courante = self
            .emplacements
            .get(&m.index)
            .and_then(|s| s.tache.as_ref())
            .map(|t| t.tache.id);
        if courante != Some(m.id) {
            debug!(index = m.index, id = m.id, "résultat périmé ignoré");
            return;
        }
        let Some(en_cours) = self.emplacement(m.index).tache.take() else {
            return;
        };
        match (en_cours.genre, m.contenu) {
            (
                Genre::Initiale {
                    requis,
                    long_timeout,
                    metriques,
                    ..
                },
                Contenu::Initial(r),
            ) => self.fin_initiale(m.index, requis, long_timeout, &en_cours.dest, metriques.as_ref(), r),
            (Genre::Reevaluation, Contenu::Reevalue(r)) => {
                self.fin_reevaluation(m.index, &en_cours.dest, r)
            }
            _ => error!(index = m.index, "message sans rapport avec la tâche courante"),
        }
    }

    fn fin_initiale(
        &mut self,
        index: i64,
        requis: bool,
        long_timeout: bool,
        dest: &Destinataire,
        cm: &dyn CharMetricsInfo,
        r: Resultat<Initial>,
    ) {
        let init = match r {
            Ok(init) => init,
            Err(CalcError::TimedOut) => {
                warn!(index, requis, "résultat trop grand pour la conversion décimale");
                self.expiration(index, requis, long_timeout, dest);
                return;
            }
            Err(CalcError::Aborted) => {
                self.signaler_erreur(dest, index, ErrorKind::Aborted);
                return;
            }
            Err(e) => {
                debug!(index, erreur = %e, "évaluation en erreur");
                if requis {
                    self.emplacement(index).cache = Cache::Errone;
                }
                self.signaler_erreur(dest, index, e.kind());
                return;
            }
        };
        let point = init.chaine.find('.').unwrap_or(init.chaine.len());
        let partie_entiere = init.chaine[..point].to_string();
        let msd = msd_index_of(&init.chaine);
        let lsd = lsd_offset(&init.val, &init.chaine, point);
        let init_prec = preferred_prec(&init.chaine, msd, lsd, cm, &self.cfg).min(init.init_display);
        let slot = self.emplacement(index);
        slot.cache = Cache::Chaine(init.chaine);
        slot.offset = init.prec;
        slot.msd = msd;
        debug!(index, prec = init.prec, "évaluation initiale terminée");
        self.signaler_evaluation(dest, index, init_prec, msd, lsd, &partie_entiere);
    }

    fn fin_reevaluation(&mut self, index: i64, dest: &Destinataire, r: Resultat<(String, i32)>) {
        let slot = self.emplacement(index);
        match r {
            Ok((chaine, prec)) => {
                let Cache::Chaine(ancienne) = &slot.cache else {
                    debug!(index, "réévaluation sans cache, ignorée");
                    return;
                };
                if prec < slot.offset {
                    error!(index, prec, offset = slot.offset, "réévaluation moins précise que le cache");
                    return;
                }
                slot.cache = Cache::Chaine(unflip_zeroes(ancienne, slot.offset, &chaine, prec));
                slot.offset = prec;
                self.signaler_reevaluation(dest, index);
            }
            Err(CalcError::Aborted) => {
                slot.offset_req = slot.offset;
            }
            Err(e) => {
                warn!(index, erreur = %e, "erreur révélée par la réévaluation");
                slot.cache = Cache::Errone;
                self.signaler_erreur(dest, index, e.kind());
            }
        }
    }

    /* ---- Notifications ---- */

    fn signaler_evaluation(
        &mut self,
        dest: &Destinataire,
        index: i64,
        init_prec: i32,
        msd: i32,
        lsd: i32,
        partie_entiere: &str,
    ) {
        match dest {
            Destinataire::Ecouteur(l) => l.on_evaluate(index, init_prec, msd, lsd, partie_entiere),
            Destinataire::Memoire => self.set_memory_index(index),
        }
    }

    fn signaler_erreur(&self, dest: &Destinataire, index: i64, kind: ErrorKind) {
        match dest {
            Destinataire::Ecouteur(l) => l.on_error(index, kind),
            Destinataire::Memoire => warn!(index, ?kind, "valeur mémoire non évaluable"),
        }
    }

    fn signaler_annulation(&self, dest: &Destinataire, index: i64) {
        if let Destinataire::Ecouteur(l) = dest {
            l.on_cancelled(index);
        }
    }

    fn signaler_reevaluation(&self, dest: &Destinataire, index: i64) {
        if let Destinataire::Ecouteur(l) = dest {
            l.on_reevaluate(index);
        }
    }

    fn notify_immediately(&mut self, index: i64, dest: &Destinataire, cm: &dyn CharMetricsInfo) {
        let Some(cache) = self.emplacements.get(&index).and_then(|s| s.chaine()).map(str::to_string)
        else {
            return;
        };
        let Some(val) = self.get_result(index) else {
            return;
        };
        let point = cache.find('.').unwrap_or(cache.len());
        let lsd = lsd_offset(&val, &cache, point);
        let msd = self.get_msd_index(index);
        let prec = preferred_prec(&cache, msd, lsd, cm, &self.cfg);
        self.signaler_evaluation(dest, index, prec, msd, lsd, &cache[..point]);
    }

    /* ---- Annulation ---- */

    /// Annule la tâche de l'emplacement ; true si c'était une évaluation initiale.
    pub fn cancel(&mut self, index: i64, quiet: bool) -> bool {
        let Some(slot) = self.emplacements.get_mut(&index) else {
            return false;
        };
        let Some(en_cours) = slot.tache.take() else {
            return false;
        };
        en_cours.tache.annuler();
        match en_cours.genre {
            Genre::Reevaluation => {
                slot.offset_req = slot.offset;
                debug!(index, "réévaluation annulée");
                false
            }
            Genre::Initiale { quiet: silencieuse, .. } => {
                if index == MAIN_INDEX {
                    // l'évaluation attendue n'a pas eu lieu
                    self.changed_value = true;
                    self.nouvel_instantane_principal();
                }
                info!(index, "évaluation annulée");
                if !(quiet || silencieuse) {
                    if let Some(r) = &self.rappel {
                        r.show_cancelled();
                    }
                }
                self.signaler_annulation(&en_cours.dest, index);
                true
            }
        }
    }

    pub fn cancel_all(&mut self, quiet: bool) -> bool {
        let indices: Vec<i64> = self.emplacements.keys().copied().collect();
        indices
            .into_iter()
            .fold(false, |acc, i| self.cancel(i, quiet) || acc)
    }

    pub fn cancel_non_main(&mut self) {
        let indices: Vec<i64> = self
            .emplacements
            .keys()
            .copied()
            .filter(|i| *i != MAIN_INDEX)
            .collect();
        for i in indices {
            self.cancel(i, true);
        }
    }

    /* ---- Consultation ---- */

    pub fn has_result(&self, index: i64) -> bool {
        self.emplacements.get(&index).is_some_and(|s| s.chaine().is_some())
    }

    /// Troncature décimale actuellement en cache ("[-]ent.frac").
    pub fn cached_string(&self, index: i64) -> Option<String> {
        self.emplacements
            .get(&index)
            .and_then(|s| s.chaine())
            .map(str::to_string)
    }

    pub fn evaluation_in_progress(&self, index: i64) -> bool {
        self.emplacements.get(&index).is_some_and(|s| s.tache.is_some())
    }

    pub fn get_result(&self, index: i64) -> Option<UnifiedReal> {
        self.partage.entree(index).ok()?.valeur.get().cloned()
    }

    pub fn get_expr(&self, index: i64) -> Resultat<Arc<Expression>> {
        if index == MAIN_INDEX {
            return Ok(Arc::new(self.principal.clone()));
        }
        self.partage.get_expr(index)
    }

    pub fn get_degree_mode(&self, index: i64) -> Resultat<bool> {
        if index == MAIN_INDEX {
            return Ok(self.degres);
        }
        Ok(self.partage.entree(index)?.degres)
    }

    pub fn get_time_stamp(&self, index: i64) -> Resultat<i64> {
        Ok(self.partage.entree(index)?.timestamp)
    }

    pub fn min_index(&self) -> i64 {
        self.partage.store.min_index()
    }

    pub fn max_index(&self) -> i64 {
        self.partage.store.max_index()
    }

    /// Index du premier chiffre significatif, corrigé si un 0.0999… est devenu 0.1000….
    fn get_msd_index(&mut self, index: i64) -> i32 {
        let valeur_nulle = self.get_result(index).is_some_and(|v| v.definitely_zero());
        let slot = self.emplacement(index);
        if slot.msd != MSD_INVALIDE {
            if let Some(s) = slot.chaine() {
                if s.as_bytes().get(slot.msd as usize) == Some(&b'0') {
                    slot.msd += 1;
                }
            }
            return slot.msd;
        }
        if valeur_nulle {
            return MSD_INVALIDE;
        }
        if let Some(m) = slot.chaine().map(msd_index_of) {
            slot.msd = m;
        }
        slot.msd
    }

    /// Chiffres à afficher jusqu'au décalage `prec_offset` (au plus `max_digs` caractères).
    ///
    /// Ne bloque jamais : les chiffres manquants sont des espaces, et une réévaluation
    /// est lancée pour les obtenir.
    pub fn get_string(
        &mut self,
        index: i64,
        prec_offset: i32,
        max_prec_offset: i32,
        max_digs: i32,
        listener: Rc<dyn EvaluationListener>,
    ) -> Affichage {
        let max_digs = max_digs.max(0);
        let dest = Destinataire::Ecouteur(listener);
        let extra_digits = self.cfg.extra_digits;
        let extra_divisor = self.cfg.extra_divisor;
        let min_displayed = self.cfg.min_displayed_digits;
        let longueur = match self.emplacements.get(&index).and_then(|s| s.chaine()) {
            Some(s) => s.len() as i32,
            None => {
                self.ensure_cache_prec(index, prec_offset.saturating_add(extra_digits), dest);
                return Affichage::vide(prec_offset);
            }
        };
        self.ensure_cache_prec(
            index,
            prec_offset
                .saturating_add(extra_digits)
                .saturating_add(longueur / extra_divisor),
            dest,
        );
        let msd = self.get_msd_index(index);
        let slot = self.emplacement(index);
        let Some(cache) = slot.chaine() else {
            return Affichage::vide(prec_offset);
        };
        let len = cache.len() as i32;
        let negatif = cache.starts_with('-');
        let mut entiers = len - slot.offset;
        if negatif {
            entiers -= 1;
        }
        let min_prec = (min_displayed - entiers).min(-1);
        let prec = prec_offset.max(min_prec).min(max_prec_offset);

        let mut extra = slot.offset - prec;
        let mut deficit = 0;
        if extra < 0 {
            extra = 0;
            deficit = (prec - slot.offset).min(max_digs);
        }
        let fin = len - extra;
        if fin < 1 {
            return Affichage::vide(prec);
        }
        let debut = (fin + deficit - max_digs).max(0);
        let mut chiffres = cache[debut as usize..fin as usize].to_string();
        chiffres.extend(std::iter::repeat(' ').take(deficit.max(0) as usize));
        Affichage {
            chiffres,
            prec_offset: prec,
            tronque: debut > msd,
            negatif,
        }
    }

    /* ---- Archives : copie, historique, réduction ---- */

    /// Copie (sans opérateurs binaires finaux) de l'emplacement, avec ou sans sa valeur.
    fn copie(&self, index: i64, avec_valeur: bool) -> Resultat<(Entree, Emplacement)> {
        let (mut expr, degres, long) = if index == MAIN_INDEX {
            (self.principal.clone(), self.degres, self.long_timeout)
        } else {
            let e = self.partage.entree(index)?;
            ((*e.expr).clone(), e.degres, e.long_timeout)
        };
        while expr.has_trailing_binary_op() {
            expr.delete();
        }
        let entree = Entree::new(expr, degres, long, 0);
        let mut slot = Emplacement::default();
        if avec_valeur {
            if let Some(v) = self.get_result(index) {
                let _ = entree.valeur.set(v);
            }
            if let Some(src) = self.emplacements.get(&index) {
                slot.cache = src.cache.clone();
                slot.offset = src.offset;
                slot.offset_req = src.offset;
                slot.msd = src.msd;
            }
        }
        Ok((entree, slot))
    }

    fn add_to_db(&mut self, in_history: bool, mut entree: Entree, slot: Emplacement) -> Resultat<i64> {
        let ligne = StoredRow {
            expression: entree.expr.to_bytes()?,
            degree_mode: entree.degres,
            long_timeout: entree.long_timeout,
            timestamp: horodatage(),
        };
        entree.timestamp = ligne.timestamp;
        let index = self.partage.store.add_row(!in_history, ligne)?;
        self.partage.installer(index, entree);
        self.emplacements.insert(index, slot);
        debug!(index, in_history, "expression archivée");
        Ok(index)
    }

    /// Archive l'emplacement évalué `index` et renvoie le nouvel index immuable.
    pub fn preserve(&mut self, index: i64, in_history: bool) -> Resultat<i64> {
        if index == MAIN_INDEX && self.changed_value {
            return Err(CalcError::syntax("expression principale non évaluée"));
        }
        let (entree, slot) = self.copie(index, true)?;
        if slot.chaine().is_none() || entree.valeur.get().is_none() {
            return Err(CalcError::syntax("expression non évaluée"));
        }
        self.add_to_db(in_history, entree, slot)
    }

    /// Fige la principale (avec sa valeur) dans l'emplacement -1.
    pub fn copy_main_to_history(&mut self) -> Resultat<()> {
        self.cancel(HISTORY_MAIN_INDEX, true);
        let (entree, slot) = self.copie(MAIN_INDEX, true)?;
        self.partage.installer(HISTORY_MAIN_INDEX, entree);
        self.emplacements.insert(HISTORY_MAIN_INDEX, slot);
        Ok(())
    }

    /// Référence abrégée vers la valeur de `index` (archivée si besoin).
    fn get_collapsed_expr(&mut self, index: i64) -> Resultat<Option<Expression>> {
        let reel = if is_mutable_index(index) {
            self.preserve(index, false)?
        } else {
            index
        };
        let entree = self.partage.entree(reel)?;
        let Some(val) = entree.valeur.get() else {
            return Ok(None);
        };
        let Some(rs) = self.emplacements.get(&reel).and_then(|s| s.chaine()) else {
            return Ok(None);
        };
        let point = rs.find('.').unwrap_or(rs.len());
        let lsd = lsd_offset(val, rs, point);
        let court = short_string(rs, msd_index_of(rs), lsd, &self.cfg);
        Ok(Some(Expression::abbreviate(reel, &court)))
    }

    /// Remplace la principale par une référence à la valeur de `index`.
    pub fn collapse(&mut self, index: i64) -> Resultat<()> {
        let long = if index == MAIN_INDEX {
            self.long_timeout
        } else {
            self.partage.entree(index)?.long_timeout
        };
        let abrege = self.get_collapsed_expr(index)?;
        self.principal.clear();
        if let Some(e) = abrege {
            self.principal.append(&e);
        }
        self.clear_main_cache();
        self.long_timeout = long;
        self.changed_value = true;
        Ok(())
    }

    /// Ajoute à la principale une référence à la valeur de `index`.
    pub fn append_expr(&mut self, index: i64) -> Resultat<()> {
        let long = self.partage.entree(index).is_ok_and(|e| e.long_timeout);
        if let Some(e) = self.get_collapsed_expr(index)? {
            self.changed_value = true;
            self.long_timeout |= long;
            self.principal.append(&e);
        }
        Ok(())
    }

    /* ---- Mémoire ---- */

    pub fn memory_index(&self) -> i64 {
        self.memory_index
    }

    fn set_memory_index(&mut self, index: i64) {
        self.memory_index = index;
        if let Some(r) = &self.rappel {
            r.on_memory_state_changed();
        }
    }

    pub fn clear_memory(&mut self) {
        self.set_memory_index(0);
    }

    /// La mémoire prend l'index une fois sa valeur disponible.
    fn set_memory_index_when_evaluated(&mut self, index: i64) -> Resultat<()> {
        self.require_result_pour(index, Destinataire::Memoire, Arc::new(MetriquesTerminal::default()))
    }

    pub fn copy_to_memory(&mut self, index: i64) -> Resultat<()> {
        let reel = if is_mutable_index(index) {
            self.preserve(index, false)?
        } else {
            index
        };
        self.set_memory_index_when_evaluated(reel)
    }

    /// Expression "mémoire op valeur(index)", la mémoire vide valant 0.
    fn somme_memoire(&mut self, index: i64, op: Opcode) -> Resultat<Option<Entree>> {
        let mut gauche = Expression::new();
        let mut long = false;
        if self.memory_index != 0 {
            match self.get_collapsed_expr(self.memory_index)? {
                Some(e) => gauche = e,
                None => return Ok(None),
            }
            long = self.partage.entree(self.memory_index)?.long_timeout;
        } else {
            gauche.add(Opcode::Digit(0));
        }
        let long = long || self.partage.entree(index).is_ok_and(|e| e.long_timeout);
        let Some(droite) = self.get_collapsed_expr(index)? else {
            return Ok(None);
        };
        let mut somme = gauche;
        somme.add(op);
        somme.append(&droite);
        Ok(Some(Entree::new(somme, false, long, 0)))
    }

    fn combiner_memoire(&mut self, index: i64, op: Opcode) -> Resultat<()> {
        let Some(entree) = self.somme_memoire(index, op)? else {
            return Ok(());
        };
        let nouveau = self.add_to_db(false, entree, Emplacement::default())?;
        // mémoire invalide pendant l'évaluation
        self.memory_index = 0;
        self.set_memory_index_when_evaluated(nouveau)
    }

    pub fn add_to_memory(&mut self, index: i64) -> Resultat<()> {
        self.combiner_memoire(index, Opcode::Add)
    }

    pub fn subtract_from_memory(&mut self, index: i64) -> Resultat<()> {
        self.combiner_memoire(index, Opcode::Sub)
    }

    /* ---- État d'instance ---- */

    /// Mode degrés, prolongation, puis l'expression principale sérialisée.
    pub fn save_instance_state(&self) -> Resultat<Vec<u8>> {
        let mut out = vec![u8::from(self.degres), u8::from(self.long_timeout)];
        out.extend(self.principal.to_bytes()?);
        Ok(out)
    }

    /// En cas de flux illisible, l'expression principale reste vide.
    pub fn restore_instance_state(&mut self, octets: &[u8]) -> Resultat<()> {
        self.cancel(MAIN_INDEX, true);
        self.clear_main();
        let [degres, long, reste @ ..] = octets else {
            return Err(CalcError::Format("état d'instance tronqué".into()));
        };
        let expr = Expression::from_bytes(reste)?;
        self.degres = *degres != 0;
        self.long_timeout = *long != 0;
        self.principal = expr;
        self.changed_value = true;
        self.clear_main_cache();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noyau::eval::tests::saisir;
    use crate::noyau::stockage::MemoryStore;
    use crate::noyau::taches::{HorlogeManuelle, OrdonnanceurManuel};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RappelTest {
        delais: RefCell<Vec<bool>>,
        annulations: RefCell<usize>,
        memoire: RefCell<usize>,
    }

    impl Rappel for RappelTest {
        fn show_timeout_dialog(&self, long_timeout: bool) {
            self.delais.borrow_mut().push(long_timeout);
        }
        fn show_cancelled(&self) {
            *self.annulations.borrow_mut() += 1;
        }
        fn on_memory_state_changed(&self) {
            *self.memoire.borrow_mut() += 1;
        }
    }

    struct Banc {
        moteur: Moteur,
        horloge: Arc<HorlogeManuelle>,
        file: Arc<OrdonnanceurManuel>,
        journal: Rc<Journal>,
        rappel: Rc<RappelTest>,
        store: Arc<MemoryStore>,
    }

    impl Banc {
        fn new() -> Self {
            Self::avec(MoteurConfig::default())
        }

        fn avec(cfg: MoteurConfig) -> Self {
            let horloge = Arc::new(HorlogeManuelle::new());
            let file = Arc::new(OrdonnanceurManuel::new());
            let store = Arc::new(MemoryStore::new());
            let mut moteur = Moteur::new(cfg, store.clone(), horloge.clone(), file.clone());
            let rappel = Rc::new(RappelTest::default());
            moteur.set_rappel(rappel.clone());
            Self {
                moteur,
                horloge,
                file,
                journal: Rc::new(Journal::new()),
                rappel,
                store,
            }
        }

        fn saisir(&mut self, s: &str) {
            self.moteur.principal = saisir(s);
            self.moteur.touch();
        }

        fn metriques() -> Arc<dyn CharMetricsInfo> {
            Arc::new(MetriquesTerminal { colonnes: 20 })
        }

        fn exiger(&mut self, index: i64) {
            self.moteur
                .require_result(index, self.journal.clone(), Self::metriques())
                .unwrap();
        }

        fn executer(&mut self) {
            self.file.executer_tout();
            self.moteur.traiter_evenements();
        }

        fn chaine(&mut self, index: i64, prec: i32) -> String {
            self.moteur
                .get_string(index, prec, 1000, 30, self.journal.clone())
                .chiffres
        }
    }

    #[test]
    fn evaluation_demandee() {
        let mut b = Banc::new();
        b.saisir("2+3×4");
        b.exiger(MAIN_INDEX);
        assert!(b.moteur.evaluation_in_progress(MAIN_INDEX));
        b.executer();
        assert!(!b.moteur.evaluation_in_progress(MAIN_INDEX));
        match b.journal.vider().as_slice() {
            [Evenement::Evalue {
                index: 0,
                init_prec_offset: -1,
                partie_entiere,
                ..
            }] => assert_eq!(partie_entiere, "14"),
            autre => panic!("inattendu : {autre:?}"),
        }
        assert!(b.moteur.has_result(MAIN_INDEX));
        assert_eq!(b.chaine(MAIN_INDEX, -1), "14");
        let v = b.moteur.get_result(MAIN_INDEX).unwrap();
        assert!(v.definitely_equals(&UnifiedReal::from(14)).unwrap());
    }

    #[test]
    fn resultat_deja_connu_notifie_sans_tache() {
        let mut b = Banc::new();
        b.saisir("7");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.journal.vider();
        b.exiger(MAIN_INDEX);
        assert!(!b.moteur.evaluation_in_progress(MAIN_INDEX));
        assert_eq!(b.file.en_attente(), 0);
        assert!(matches!(b.journal.vider().as_slice(), [Evenement::Evalue { index: 0, .. }]));
    }

    #[test]
    fn division_par_zero() {
        let mut b = Banc::new();
        b.saisir("5÷0");
        b.exiger(MAIN_INDEX);
        b.executer();
        assert_eq!(
            b.journal.vider(),
            vec![Evenement::Erreur {
                index: 0,
                kind: ErrorKind::DivisionByZero
            }]
        );
        assert!(!b.moteur.has_result(MAIN_INDEX));
        // une nouvelle demande relance l'évaluation
        b.exiger(MAIN_INDEX);
        assert!(b.moteur.evaluation_in_progress(MAIN_INDEX));
    }

    #[test]
    fn resultat_perime_ignore() {
        let mut b = Banc::new();
        b.saisir("2+3");
        b.exiger(MAIN_INDEX);
        assert!(b.moteur.cancel(MAIN_INDEX, true));
        assert_eq!(b.journal.vider(), vec![Evenement::Annule { index: 0 }]);
        b.moteur.append(Opcode::Mul);
        b.moteur.append(Opcode::Digit(4));
        b.moteur.delete();
        // la tâche annulée termine quand même, en retard
        b.executer();
        assert!(b.journal.is_empty());
        assert!(!b.moteur.has_result(MAIN_INDEX));
        assert!(b.moteur.get_result(MAIN_INDEX).is_none());
        assert_eq!(b.moteur.main_expr().to_string(), "2+3×");
        assert_eq!(*b.rappel.annulations.borrow(), 0);
    }

    #[test]
    fn echeance_depassee() {
        let mut b = Banc::new();
        b.saisir("2+3");
        b.exiger(MAIN_INDEX);
        b.horloge.avancer(Duration::from_millis(2_001));
        b.moteur.traiter_evenements();
        assert_eq!(
            b.journal.vider(),
            vec![Evenement::Erreur {
                index: 0,
                kind: ErrorKind::TimedOut
            }]
        );
        assert_eq!(*b.rappel.delais.borrow(), vec![false]);
        b.executer();
        assert!(b.journal.is_empty());
        assert!(!b.moteur.has_result(MAIN_INDEX));
    }

    #[test]
    fn evaluation_speculative_silencieuse() {
        let mut b = Banc::new();
        b.saisir("2+3");
        b.moteur
            .evaluate_and_notify(MAIN_INDEX, b.journal.clone(), Banc::metriques())
            .unwrap();
        b.horloge.avancer(Duration::from_millis(1_001));
        b.moteur.traiter_evenements();
        assert_eq!(b.journal.vider(), vec![Evenement::Annule { index: 0 }]);
        assert!(b.rappel.delais.borrow().is_empty());
    }

    #[test]
    fn borne_de_taille() {
        let cfg = MoteurConfig {
            quick_max_result_bits: 10,
            required_max_result_bits: 20,
            long_max_result_bits: 30,
            ..MoteurConfig::default()
        };
        let mut b = Banc::avec(cfg);
        b.saisir("2^100");
        b.exiger(MAIN_INDEX);
        b.executer();
        assert_eq!(
            b.journal.vider(),
            vec![Evenement::Erreur {
                index: 0,
                kind: ErrorKind::TimedOut
            }]
        );
        assert!(!b.moteur.has_result(MAIN_INDEX));
        // avec la prolongation, la borne longue s'applique
        b.moteur.set_long_timeout();
        assert_eq!(*b.rappel.delais.borrow(), vec![false]);
    }

    #[test]
    fn reevaluation_plus_precise() {
        let mut b = Banc::new();
        b.saisir("1÷3");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.journal.vider();
        let court = b.chaine(MAIN_INDEX, 10);
        assert!(court.ends_with("3333333333"));
        let offset_initial = b.moteur.emplacements[&MAIN_INDEX].offset;
        // au-delà du cache : espaces, puis réévaluation
        let loin = offset_initial + 100;
        let s = b.chaine(MAIN_INDEX, loin);
        assert!(s.ends_with(' '));
        assert!(b.moteur.evaluation_in_progress(MAIN_INDEX));
        b.executer();
        assert_eq!(b.journal.vider(), vec![Evenement::Reevalue { index: 0 }]);
        assert!(b.moteur.emplacements[&MAIN_INDEX].offset >= loin);
        let s = b.chaine(MAIN_INDEX, loin);
        assert_eq!(s, "3".repeat(30));
    }

    #[test]
    fn chaine_demandee_avant_la_notification_initiale() {
        let mut b = Banc::new();
        b.saisir("1÷3");
        b.exiger(MAIN_INDEX);
        // la valeur est calculée, son message n'est pas encore reçu
        b.file.executer_tout();
        assert!(b.moteur.get_result(MAIN_INDEX).is_some());
        // rien en cache : un blanc, et l'évaluation initiale n'est pas annulée
        assert_eq!(b.chaine(MAIN_INDEX, 5), " ");
        assert!(b.moteur.evaluation_in_progress(MAIN_INDEX));
        assert_eq!(b.file.en_attente(), 0);
        b.executer();
        assert!(matches!(
            b.journal.vider().as_slice(),
            [Evenement::Evalue { index: 0, .. }]
        ));
        assert!(b.moteur.has_result(MAIN_INDEX));
        assert!(!b.moteur.evaluation_in_progress(MAIN_INDEX));
        assert!(b.chaine(MAIN_INDEX, 5).ends_with("33333"));
    }

    #[test]
    fn largeur_negative_sans_panique() {
        let mut b = Banc::new();
        b.saisir("1÷3");
        b.exiger(MAIN_INDEX);
        b.executer();
        let a = b
            .moteur
            .get_string(MAIN_INDEX, 5, 1000, -3, b.journal.clone());
        assert_eq!(a.chiffres, "");
        let a = b.moteur.get_string(MAIN_INDEX, 5, 1000, 0, b.journal.clone());
        assert_eq!(a.chiffres, "");
    }

    #[test]
    fn archivage_et_reduction() {
        let mut b = Banc::new();
        b.saisir("1÷3");
        b.exiger(MAIN_INDEX);
        b.executer();
        let index = b.moteur.preserve(MAIN_INDEX, true).unwrap();
        assert_eq!(index, -2);
        assert!(b.moteur.has_result(index));
        assert!(b.moteur.get_time_stamp(index).unwrap() > 0);
        assert_eq!(b.moteur.min_index(), -2);

        b.moteur.collapse(index).unwrap();
        assert_eq!(b.moteur.main_expr().len(), 1);
        b.moteur.append(Opcode::Mul);
        b.moteur.append(Opcode::Digit(3));
        b.journal.vider();
        b.exiger(MAIN_INDEX);
        b.executer();
        let v = b.moteur.get_result(MAIN_INDEX).unwrap();
        assert!(v.definitely_equals(&UnifiedReal::one()).unwrap());
    }

    #[test]
    fn archive_relue_depuis_le_stockage() {
        let mut b = Banc::new();
        let row = StoredRow {
            expression: saisir("6×7").to_bytes().unwrap(),
            degree_mode: false,
            long_timeout: false,
            timestamp: 0,
        };
        let index = b.store.add_row(false, row).unwrap();
        b.exiger(index);
        b.executer();
        assert!(b.moteur.has_result(index));
        assert_eq!(b.chaine(index, -1), "42");
    }

    #[test]
    fn principale_non_evaluee_non_archivee() {
        let mut b = Banc::new();
        b.saisir("2");
        assert!(b.moteur.preserve(MAIN_INDEX, true).is_err());
    }

    #[test]
    fn memoire() {
        let mut b = Banc::new();
        b.saisir("5");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.moteur.copy_to_memory(MAIN_INDEX).unwrap();
        let m = b.moteur.memory_index();
        assert!(m > 0);
        assert!(*b.rappel.memoire.borrow() >= 1);

        b.saisir("2");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.moteur.subtract_from_memory(MAIN_INDEX).unwrap();
        assert_eq!(b.moteur.memory_index(), 0);
        b.executer();
        let m = b.moteur.memory_index();
        assert!(m > 0);
        let v = b.moteur.get_result(m).unwrap();
        assert!(v.definitely_equals(&UnifiedReal::from(3)).unwrap());
    }

    #[test]
    fn copie_pour_historique() {
        let mut b = Banc::new();
        b.saisir("2+2×");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.moteur.copy_main_to_history().unwrap();
        assert!(b.moteur.has_result(HISTORY_MAIN_INDEX));
        assert_eq!(b.moteur.get_expr(HISTORY_MAIN_INDEX).unwrap().to_string(), "2+2");
        b.journal.vider();
        b.exiger(HISTORY_MAIN_INDEX);
        assert!(matches!(b.journal.vider().as_slice(), [Evenement::Evalue { index: -1, .. }]));
    }

    #[test]
    fn etat_d_instance() {
        let mut b = Banc::new();
        b.saisir("sin(30)");
        b.moteur.set_degree_mode(true);
        b.moteur.set_long_timeout();
        let octets = b.moteur.save_instance_state().unwrap();

        let mut c = Banc::new();
        c.moteur.restore_instance_state(&octets).unwrap();
        assert!(c.moteur.degree_mode());
        assert!(c.moteur.long_timeout());
        assert_eq!(c.moteur.main_expr(), b.moteur.main_expr());
        c.exiger(MAIN_INDEX);
        c.executer();
        let v = c.moteur.get_result(MAIN_INDEX).unwrap();
        assert!(v.definitely_equals(&UnifiedReal::fraction(1, 2)).unwrap());

        assert!(matches!(
            c.moteur.restore_instance_state(&[1]),
            Err(CalcError::Format(_))
        ));
        assert!(c.moteur.is_empty());
    }

    #[test]
    fn tout_effacer() {
        let mut b = Banc::new();
        b.saisir("8");
        b.exiger(MAIN_INDEX);
        b.executer();
        b.moteur.copy_to_memory(MAIN_INDEX).unwrap();
        b.moteur.set_degree_mode(true);
        b.moteur.clear_everything();
        assert_eq!(b.moteur.memory_index(), 0);
        assert!(b.store.is_empty());
        assert!(b.moteur.is_empty());
        assert!(b.moteur.degree_mode());
    }

    #[test]
    fn threads_et_attente() {
        let store = Arc::new(MemoryStore::new());
        let mut m = Moteur::avec_defauts(MoteurConfig::default(), store);
        let journal = Rc::new(Journal::new());
        for op in [Opcode::Sqrt, Opcode::Digit(2)] {
            m.append(op);
        }
        m.require_result(MAIN_INDEX, journal.clone(), Arc::new(MetriquesTerminal::default()))
            .unwrap();
        m.attendre(MAIN_INDEX);
        assert!(matches!(journal.vider().as_slice(), [Evenement::Evalue { index: 0, .. }]));
        let s = m.get_string(MAIN_INDEX, 10, 1000, 30, journal.clone()).chiffres;
        assert_eq!(s, "1.4142135623");
    }
}
