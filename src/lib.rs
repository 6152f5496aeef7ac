//! Calculatrice exacte
//!
//! Bibliothèque : rationnels bornés, réels constructifs, représentation
//! unifiée, expressions par jetons et moteur d'évaluation asynchrone.
//! Le terminal (src/main.rs) n'en est qu'un client.

pub mod noyau;
