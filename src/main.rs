// src/main.rs
//
// Calculatrice exacte — point d’entrée (terminal)
// -----------------------------------------------
// But:
// - Lire les options (clap) : configuration TOML, mode d'angle, largeur
// - Installer la journalisation (tracing-subscriber, RUST_LOG ou --verbose)
// - Une expression en argument : calcul unique ; sinon boucle interactive
//
// IMPORTANT (structure projet):
// - Le noyau vit dans la bibliothèque (src/lib.rs) ; ici, rien que le terminal.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use calculatrice_exacte::noyau::config::MoteurConfig;
use calculatrice_exacte::noyau::moteur::Moteur;
use calculatrice_exacte::noyau::stockage::MemoryStore;

mod app;

use app::AppCalc;

#[derive(Parser)]
#[command(name = "calculatrice_exacte")]
#[command(about = "Calculatrice à précision arbitraire (réels constructifs)")]
#[command(version)]
struct Cli {
    /// Seuils du moteur (fichier TOML)
    #[arg(long, value_name = "FICHIER")]
    config: Option<PathBuf>,

    /// Angles en degrés
    #[arg(long)]
    degres: bool,

    /// Largeur d'affichage du résultat, en chiffres
    #[arg(long, value_name = "N")]
    chiffres: Option<i32>,

    /// Journal détaillé (debug) sur la sortie d'erreur
    #[arg(short, long)]
    verbose: bool,

    /// Expression à évaluer une seule fois (ex. "sqrt(2)*pi")
    expression: Option<String>,
}

/* ------------------------ Journalisation ------------------------ */

fn installer_journal(verbose: bool) {
    let defaut = if verbose { "debug" } else { "warn" };
    let filtre = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(defaut));
    tracing_subscriber::fmt()
        .with_env_filter(filtre)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/* ------------------------ Entrée ------------------------ */

fn main() -> ExitCode {
    let cli = Cli::parse();
    installer_journal(cli.verbose);

    let cfg = match &cli.config {
        Some(chemin) => match MoteurConfig::charger(chemin) {
            Ok(c) => c,
            Err(e) => {
                error!(fichier = %chemin.display(), erreur = %e, "configuration refusée");
                eprintln!("configuration {} : {e}", chemin.display());
                return ExitCode::FAILURE;
            }
        },
        None => MoteurConfig::default(),
    };
    info!(?cfg, "démarrage");

    let moteur = Moteur::avec_defauts(cfg, Arc::new(MemoryStore::new()));
    let mut app = AppCalc::new(moteur, cli.chiffres);
    app.set_degres(cli.degres);

    match cli.expression {
        Some(texte) => calcul_unique(&mut app, &texte),
        None => {
            let stdin = io::stdin();
            match app.repl(stdin.lock(), io::stdout()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(erreur = %e, "terminal fermé");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Évalue une expression, affiche le résultat ou l'erreur.
fn calcul_unique(app: &mut AppCalc, texte: &str) -> ExitCode {
    let r = app.saisir(texte).and_then(|_| app.egal());
    for m in app.messages.drain(..) {
        eprintln!("{m}");
    }
    if let Err(e) = r {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    if !app.erreur.is_empty() {
        eprintln!("{}", app.erreur);
        return ExitCode::FAILURE;
    }
    match app.rendu_resultat() {
        Some(r) => {
            println!("{r}");
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}
