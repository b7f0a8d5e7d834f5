use crate::models::deploy::Deploy;

#[derive(Debug, Clone)]
pub struct Wave {
    pub level: usize,
    pub deploys: Vec<Deploy>,
}
