//! Tests scientifiques (campagne) : propriétés de bout en bout, du jeton à l'affichage.
//!
//! But : vérifier ce que l'utilisateur voit, en passant par le moteur complet.
//! - horloge et ordonnanceur manuels : aucune attente réelle, ordre maîtrisé
//! - budget temps global
//! - le chemin symbolique et le repli numérique doivent s'accorder
//!
//! Notes :
//! - Les chaînes en cache sont des troncatures ; une précision plus grande
//!   ne peut que prolonger la chaîne, au dernier chiffre près
//!   (la bascule 9…9 → 0…0 n'apparaît pas dans les valeurs testées).
//! - Une tâche annulée peut encore tourner jusqu'au bout : son résultat doit être ignoré.

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::MoteurConfig;
use super::erreurs::{CalcError, ErrorKind};
use super::eval::eval;
use super::eval::tests::{saisir, TableResolver};
use super::expr::Expression;
use super::format::{CharMetricsInfo, MetriquesTerminal};
use super::jetons::{touches, Opcode, Touche};
use super::moteur::{Evenement, Journal, Moteur, MAIN_INDEX};
use super::rationnel::BoundedRational;
use super::reel::UnifiedReal;
use super::reel_constructif::{self as cr, Cr};
use super::stockage::MemoryStore;
use super::taches::{HorlogeManuelle, OrdonnanceurManuel};

/// Budget global anti-gel.
fn budget(start: Instant, max: Duration) {
    if start.elapsed() > max {
        panic!("budget temps dépassé: {:?}", max);
    }
}

fn valeur(s: &str) -> Result<UnifiedReal, CalcError> {
    eval(&saisir(s), false, &TableResolver::default())
}

/* ------------------------ Banc moteur ------------------------ */

struct Poste {
    moteur: Moteur,
    horloge: Arc<HorlogeManuelle>,
    file: Arc<OrdonnanceurManuel>,
    journal: Rc<Journal>,
}

impl Poste {
    fn new(cfg: MoteurConfig, store: Arc<MemoryStore>) -> Self {
        let horloge = Arc::new(HorlogeManuelle::new());
        let file = Arc::new(OrdonnanceurManuel::new());
        let moteur = Moteur::new(cfg, store, horloge.clone(), file.clone());
        Self {
            moteur,
            horloge,
            file,
            journal: Rc::new(Journal::new()),
        }
    }

    fn defaut() -> Self {
        Self::new(MoteurConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn taper(&mut self, s: &str) {
        for t in touches(s).unwrap() {
            match t {
                Touche::Op(op) => self.moteur.append(op),
                Touche::Exposant(e) => self.moteur.add_exponent(e),
            };
        }
    }

    fn metriques() -> Arc<dyn CharMetricsInfo> {
        Arc::new(MetriquesTerminal { colonnes: 24 })
    }

    fn exiger(&mut self) {
        self.moteur
            .require_result(MAIN_INDEX, self.journal.clone(), Self::metriques())
            .unwrap();
    }

    fn executer(&mut self) {
        self.file.executer_tout();
        self.moteur.traiter_evenements();
    }

    fn evaluer(&mut self, s: &str) -> Vec<Evenement> {
        self.moteur.clear_main();
        self.taper(s);
        self.exiger();
        self.executer();
        self.journal.vider()
    }

    fn chaine(&mut self, prec: i32) -> String {
        self.moteur
            .get_string(MAIN_INDEX, prec, 100_000, 40, self.journal.clone())
            .chiffres
    }
}

/* ------------------------ Scénarios de base ------------------------ */

#[test]
fn sci_scenario_de_base() {
    let v = valeur("2+3*4").unwrap();
    assert!(v.definitely_equals(&UnifiedReal::from(14)).unwrap());

    let mut p = Poste::defaut();
    match p.evaluer("2+3*4").as_slice() {
        [Evenement::Evalue { partie_entiere, .. }] => assert_eq!(partie_entiere, "14"),
        autre => panic!("inattendu : {autre:?}"),
    }
}

#[test]
fn sci_pourcentage_du_total() {
    assert_eq!(
        valeur("100+10%").unwrap().bounded_rational_value(),
        Some(BoundedRational::from(110))
    );
    assert_eq!(
        valeur("10%").unwrap().bounded_rational_value(),
        Some(BoundedRational::new(1, 10))
    );
}

#[test]
fn sci_division_par_zero() {
    assert!(matches!(valeur("5/0"), Err(CalcError::DivisionByZero)));
    let mut p = Poste::defaut();
    assert_eq!(
        p.evaluer("5/0"),
        vec![Evenement::Erreur {
            index: MAIN_INDEX,
            kind: ErrorKind::DivisionByZero
        }]
    );
    assert!(!p.moteur.has_result(MAIN_INDEX));
}

#[test]
fn sci_racine_au_carre_exacte() {
    let v = valeur("sqrt(2)*sqrt(2)").unwrap();
    assert_eq!(v.bounded_rational_value(), Some(BoundedRational::from(2)));
    let v = valeur("sqrt(3)^2").unwrap();
    assert_eq!(v.bounded_rational_value(), Some(BoundedRational::from(3)));
}

#[test]
fn sci_borne_de_taille_sans_conversion() {
    let cfg = MoteurConfig {
        quick_max_result_bits: 64,
        required_max_result_bits: 128,
        long_max_result_bits: 256,
        ..MoteurConfig::default()
    };
    let mut p = Poste::new(cfg, Arc::new(MemoryStore::new()));
    let t0 = Instant::now();
    assert_eq!(
        p.evaluer("10^100"),
        vec![Evenement::Erreur {
            index: MAIN_INDEX,
            kind: ErrorKind::TimedOut
        }]
    );
    // aucune chaîne décimale produite
    assert!(p.moteur.cached_string(MAIN_INDEX).is_none());
    budget(t0, Duration::from_secs(5));
}

#[test]
fn sci_puissances_extremes_bornees() {
    let t0 = Instant::now();
    // partie entière de 2^36 bits : refusée avant toute multiplication
    assert_eq!(valeur("2^68719476736").unwrap_err(), CalcError::TimedOut);
    let mut p = Poste::defaut();
    assert_eq!(
        p.evaluer("2^68719476736"),
        vec![Evenement::Erreur {
            index: MAIN_INDEX,
            kind: ErrorKind::TimedOut
        }]
    );
    assert!(!p.moteur.has_result(MAIN_INDEX));
    budget(t0, Duration::from_secs(2));

    // base minuscule, exposant de 3322 bits : évalué sans récursion profonde
    match p.evaluer("exp(-2000)^10^1000").as_slice() {
        [Evenement::Evalue { partie_entiere, .. }] => assert_eq!(partie_entiere, "0"),
        autre => panic!("inattendu : {autre:?}"),
    }
    budget(t0, Duration::from_secs(10));
}

/* ------------------------ Cohérence symbolique / numérique ------------------------ */

#[test]
fn sci_symbolique_et_numerique_concordent() {
    let t0 = Instant::now();
    let cas: Vec<(&str, Cr)> = vec![
        ("sqrt(2)*sqrt(2)", Cr::entier(2).sqrt().multiply(&Cr::entier(2).sqrt())),
        (
            "ln(8)/ln(2)",
            Cr::entier(8).ln().unwrap().divide(&Cr::entier(2).ln().unwrap()),
        ),
        ("sin(pi/6)", cr::pi().divide(&Cr::entier(6)).sin().unwrap()),
        ("cos(pi/3)", cr::pi().divide(&Cr::entier(3)).cos().unwrap()),
        ("exp(ln(5))", Cr::entier(5).ln().unwrap().exp().unwrap()),
        ("sqrt(8)/sqrt(2)", Cr::entier(8).sqrt().divide(&Cr::entier(2).sqrt())),
        ("e^2", cr::e_construit().multiply(&cr::e_construit())),
        ("2*pi-pi", cr::pi()),
    ];
    for (s, numerique) in cas {
        let exact = valeur(s).unwrap_or_else(|e| panic!("{s}: {e}"));
        assert_eq!(
            exact.cr_value().compare_to_abs(&numerique, -200).unwrap(),
            0,
            "écart symbolique/numérique pour {s}"
        );
        // la forme opaque de la même valeur s'accorde aussi
        let opaque = UnifiedReal::opaque(numerique);
        assert!(exact.approx_equals(&opaque, -200).unwrap(), "{s}");
        budget(t0, Duration::from_secs(20));
    }
}

#[test]
fn sci_faits_symboliques() {
    assert!(valeur("ln(8)/ln(2)").unwrap().definitely_rational());
    assert!(valeur("sin(pi/6)").unwrap().definitely_rational());
    assert!(valeur("sqrt(2)").unwrap().definitely_irrational());
    assert!(valeur("pi").unwrap().definitely_transcendental());
    assert!(valeur("pi")
        .unwrap()
        .definitely_not_equals(&valeur("sqrt(2)").unwrap()));
}

/* ------------------------ Précision monotone ------------------------ */

#[test]
fn sci_precision_monotone() {
    let t0 = Instant::now();
    for s in ["sqrt(2)", "pi", "1/7", "ln(3)"] {
        let mut p = Poste::defaut();
        p.evaluer(s);
        let mut precedent = p.moteur.cached_string(MAIN_INDEX).unwrap();
        for prec in [20, 60, 150, 400] {
            p.chaine(prec);
            p.executer();
            let courant = p.moteur.cached_string(MAIN_INDEX).unwrap();
            assert!(courant.len() >= precedent.len(), "{s} à {prec}");
            // le dernier chiffre d'une approximation peut encore bouger
            let sur = &precedent[..precedent.len().saturating_sub(2)];
            assert!(
                courant.starts_with(sur),
                "{s} à {prec} : {sur} n'est pas un préfixe de {courant}"
            );
            precedent = courant;
            budget(t0, Duration::from_secs(20));
        }
        assert!(p.chaine(400).chars().all(|c| c.is_ascii_digit()), "{s}");
    }
}

/* ------------------------ Annulation ------------------------ */

#[test]
fn sci_annulation_puis_trois_modifications() {
    let mut p = Poste::defaut();
    p.taper("2+3*4");
    p.exiger();
    assert_eq!(p.file.en_attente(), 1);

    assert!(p.moteur.cancel(MAIN_INDEX, true));
    assert_eq!(p.journal.vider(), vec![Evenement::Annule { index: MAIN_INDEX }]);
    p.moteur.append(Opcode::Add);
    p.moteur.append(Opcode::Digit(1));
    p.moteur.delete();

    // la tâche périmée termine tard
    p.executer();
    assert!(p.journal.vider().is_empty());
    assert!(!p.moteur.has_result(MAIN_INDEX));
    assert!(p.moteur.get_result(MAIN_INDEX).is_none());
    assert_eq!(p.moteur.main_expr().to_string(), "2+3×4+");

    // une nouvelle demande voit l'expression courante
    p.exiger();
    p.executer();
    let v = p.moteur.get_result(MAIN_INDEX).unwrap();
    assert!(v.definitely_equals(&UnifiedReal::from(14)).unwrap());
}

#[test]
fn sci_echeance_sur_horloge_manuelle() {
    let mut p = Poste::defaut();
    p.taper("pi");
    p.exiger();
    p.horloge.avancer(Duration::from_secs(60));
    p.moteur.traiter_evenements();
    assert_eq!(
        p.journal.vider(),
        vec![Evenement::Erreur {
            index: MAIN_INDEX,
            kind: ErrorKind::TimedOut
        }]
    );
    // le travail abandonné ne publie rien
    p.executer();
    assert!(p.journal.vider().is_empty());
    assert!(!p.moteur.has_result(MAIN_INDEX));
}

/* ------------------------ Persistance ------------------------ */

#[test]
fn sci_persistance_entre_instances() {
    let store = Arc::new(MemoryStore::new());
    let mut a = Poste::new(MoteurConfig::default(), store.clone());
    a.moteur.set_degree_mode(true);
    a.evaluer("sin(30)+1.5E2");
    let h = a.moteur.preserve(MAIN_INDEX, true).unwrap();
    let etat = a.moteur.save_instance_state().unwrap();

    let mut b = Poste::new(MoteurConfig::default(), store);
    b.moteur.restore_instance_state(&etat).unwrap();
    assert!(b.moteur.degree_mode());
    assert_eq!(
        b.moteur.main_expr().to_string(),
        a.moteur.main_expr().to_string()
    );
    // l'archive est relue depuis le stockage partagé
    assert!(b.moteur.get_degree_mode(h).unwrap());
    let relue = b.moteur.get_expr(h).unwrap();
    assert_eq!(relue.to_string(), a.moteur.main_expr().to_string());

    b.exiger();
    b.executer();
    let v = b.moteur.get_result(MAIN_INDEX).unwrap();
    assert_eq!(v.bounded_rational_value(), Some(BoundedRational::new(301, 2)));
}

#[test]
fn sci_octets_d_expression() {
    let mut e = saisir("12.5E-3×√(2)+sin(");
    e.append(&Expression::abbreviate(-7, "0.333…"));
    let relue = Expression::from_bytes(&e.to_bytes().unwrap()).unwrap();
    assert_eq!(relue, e);
    assert!(Expression::from_bytes(&[0xFF, 0xFF, 0xFF]).is_err());
}
