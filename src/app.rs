// src/app.rs
//
// Calculatrice exacte — module App (racine)
// -----------------------------------------
// Rôle:
// - Déclarer les sous-modules (etat.rs + vue.rs)
// - Ré-exporter AppCalc (pour main.rs: use crate::app::AppCalc;)
// - Boucle de lecture ligne à ligne (REPL) et commandes ":…"
//
// Important:
// - Une ligne sans ":" est tapée comme une suite de touches, puis un aperçu est affiché.
// - "=" seul (ou en fin de ligne) demande le résultat.

pub mod etat;
pub mod vue;

pub use etat::AppCalc;

use std::io::{self, BufRead, Write};

use tracing::warn;

/// Une ligne de saisie interprétée.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Commande {
    Saisie { texte: String, egal: bool },
    MemoirePlus,
    MemoireMoins,
    MemoireRappel,
    Degres(bool),
    Historique,
    Plus(i32),
    Prolonger,
    Effacer,
    EffacerTout,
    Aide,
    Quitter,
    Inconnue(String),
}

impl Commande {
    pub fn lire(ligne: &str) -> Option<Commande> {
        let ligne = ligne.trim();
        if ligne.is_empty() {
            return None;
        }
        let Some(cmd) = ligne.strip_prefix(':') else {
            let (texte, egal) = match ligne.strip_suffix('=') {
                Some(t) => (t.trim_end(), true),
                None => (ligne, false),
            };
            return Some(Commande::Saisie {
                texte: texte.to_string(),
                egal,
            });
        };
        let mut mots = cmd.split_whitespace();
        let c = match mots.next().unwrap_or("") {
            "m+" => Commande::MemoirePlus,
            "m-" => Commande::MemoireMoins,
            "mr" => Commande::MemoireRappel,
            "deg" => Commande::Degres(true),
            "rad" => Commande::Degres(false),
            "hist" => Commande::Historique,
            "plus" => match mots.next().map(str::parse::<i32>) {
                Some(Ok(n)) => Commande::Plus(n),
                None => Commande::Plus(10),
                Some(Err(_)) => Commande::Inconnue(ligne.to_string()),
            },
            "long" => Commande::Prolonger,
            "del" => Commande::Effacer,
            "c" => Commande::EffacerTout,
            "aide" | "h" | "?" => Commande::Aide,
            "q" | "quit" => Commande::Quitter,
            _ => Commande::Inconnue(ligne.to_string()),
        };
        Some(c)
    }
}

impl AppCalc {
    /// Exécute une commande et renvoie les lignes à afficher ; None = quitter.
    pub fn executer(&mut self, cmd: Commande) -> Option<Vec<String>> {
        let mut sortie = Vec::new();
        let r = match cmd {
            Commande::Quitter => return None,
            Commande::Saisie { texte, egal } => self.saisir(&texte).and_then(|refusees| {
                if refusees > 0 {
                    sortie.push(format!("({refusees} touche(s) ignorée(s))"));
                }
                if egal {
                    self.egal()
                } else {
                    self.apercu()
                }
            }),
            Commande::MemoirePlus => self.memoire_plus(),
            Commande::MemoireMoins => self.memoire_moins(),
            Commande::MemoireRappel => self.memoire_rappel(),
            Commande::Degres(d) => {
                self.set_degres(d);
                Ok(())
            }
            Commande::Historique => {
                sortie.extend(self.rendu_historique());
                return Some(sortie);
            }
            Commande::Plus(n) => {
                self.plus(n);
                Ok(())
            }
            Commande::Prolonger => {
                self.prolonger();
                Ok(())
            }
            Commande::Effacer => {
                self.effacer();
                Ok(())
            }
            Commande::EffacerTout => {
                self.tout_effacer();
                Ok(())
            }
            Commande::Aide => {
                sortie.push(vue::AIDE.to_string());
                return Some(sortie);
            }
            Commande::Inconnue(c) => {
                sortie.push(format!("commande inconnue : {c} (:aide)"));
                return Some(sortie);
            }
        };
        if let Err(e) = r {
            warn!(erreur = %e, "commande refusée");
            sortie.push(e.to_string());
        }
        sortie.append(&mut self.messages);
        if let Some(l) = self.rendu_principal() {
            sortie.push(l);
        }
        Some(sortie)
    }

    /// Boucle interactive jusqu'à ":q" ou la fin de l'entrée.
    pub fn repl(&mut self, entree: impl BufRead, mut sortie: impl Write) -> io::Result<()> {
        write!(sortie, "{}", self.invite())?;
        sortie.flush()?;
        for ligne in entree.lines() {
            let ligne = ligne?;
            if let Some(cmd) = Commande::lire(&ligne) {
                match self.executer(cmd) {
                    Some(lignes) => {
                        for l in lignes {
                            writeln!(sortie, "{l}")?;
                        }
                    }
                    None => break,
                }
            }
            write!(sortie, "{}", self.invite())?;
            sortie.flush()?;
        }
        writeln!(sortie)?;
        Ok(())
    }
}
