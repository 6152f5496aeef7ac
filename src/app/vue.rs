// src/app/vue.rs
//
// Vue (terminal)
// --------------
// Objectifs :
// - Résultat : chiffres fournis par le moteur, défilables vers la droite (:plus)
// - Un "…" en tête quand des chiffres significatifs sont coupés à gauche
// - Historique : "expression = forme courte"
//
// Note :
// - get_string ne bloque jamais : les chiffres manquants arrivent en espaces,
//   on attend alors la réévaluation puis on redemande.

use calculatrice_exacte::noyau::format::short_string;
use calculatrice_exacte::noyau::lecture::{lsd_offset, msd_index_of, ELLIPSE};
use calculatrice_exacte::noyau::moteur::MAIN_INDEX;

use super::etat::AppCalc;

/// Nombre de tentatives quand des chiffres sont encore en calcul.
const TENTATIVES: usize = 4;

pub const AIDE: &str = "\
Saisie : chiffres, + - * / ^ ! % ( ), sqrt ou √, pi ou π, e, sin cos tan,
         asin acos atan, ln log exp, 1.5E-3 pour un exposant.
=        évalue et range le résultat dans l'historique
:m+ :m-  ajoute / retranche la valeur courante à la mémoire
:mr      insère la mémoire
:deg :rad  mode d'angle
:hist    historique
:plus N  affiche N chiffres de plus
:long    prolonge le délai du prochain =
:c       efface l'expression, :del efface la dernière touche
:q       quitte";

impl AppCalc {
    /// Ligne de résultat, ou le message d'erreur.
    pub fn rendu_resultat(&mut self) -> Option<String> {
        if !self.erreur.is_empty() {
            return Some(self.erreur.clone());
        }
        let lecture = self.lecture.clone()?;
        let largeur = self.colonnes();
        let mut aff = None;
        for _ in 0..TENTATIVES {
            let a = self.moteur.get_string(
                lecture.index,
                lecture.prec_offset,
                lecture.max_prec_offset,
                largeur,
                self.journal.clone(),
            );
            if !a.chiffres.ends_with(' ') {
                aff = Some(a);
                break;
            }
            self.moteur.attendre(lecture.index);
            self.journal.vider();
            aff = Some(a);
        }
        let aff = aff?;
        if let Some(l) = &mut self.lecture {
            l.prec_offset = aff.prec_offset;
        }
        let chiffres = aff.chiffres.trim_end();
        let mut ligne = String::new();
        if aff.tronque {
            // le signe est coupé avec les chiffres de tête
            if aff.negatif {
                ligne.push('-');
            }
            ligne.push(ELLIPSE);
            ligne.push_str(chiffres.trim_start_matches('-'));
        } else {
            ligne.push_str(chiffres);
        }
        Some(ligne)
    }

    /// "expression = valeur courte" pour un index archivé.
    pub fn rendu_entree(&self, index: i64) -> String {
        let expr = self
            .moteur
            .get_expr(index)
            .map(|e| e.to_string())
            .unwrap_or_default();
        let valeur = match (
            self.moteur.get_result(index),
            self.moteur.cached_string(index),
        ) {
            (Some(v), Some(cache)) => {
                let point = cache.find('.').unwrap_or(cache.len());
                let lsd = lsd_offset(&v, &cache, point);
                short_string(&cache, msd_index_of(&cache), lsd, self.moteur.config())
            }
            _ => "?".to_string(),
        };
        format!("{expr} = {valeur}")
    }

    pub fn rendu_historique(&self) -> Vec<String> {
        self.historique
            .iter()
            .rev()
            .map(|&i| format!("[{i}] {}", self.rendu_entree(i)))
            .collect()
    }

    /// Invite : expression en cours, mode d'angle, mémoire.
    pub fn invite(&self) -> String {
        let mut s = String::new();
        if self.moteur.degree_mode() {
            s.push_str("DEG ");
        }
        if self.moteur.memory_index() != 0 {
            s.push_str("M ");
        }
        if self.apres_egal.is_none() {
            s.push_str(&self.moteur.main_expr().to_string());
        }
        s.push_str("> ");
        s
    }

    /// Ligne affichée sous la saisie (aperçu ou résultat).
    pub fn rendu_principal(&mut self) -> Option<String> {
        let r = self.rendu_resultat()?;
        let index = self.lecture.as_ref().map_or(MAIN_INDEX, |l| l.index);
        if index == MAIN_INDEX && self.apres_egal.is_none() {
            Some(format!("  {r}"))
        } else {
            Some(format!("= {r}"))
        }
    }
}
