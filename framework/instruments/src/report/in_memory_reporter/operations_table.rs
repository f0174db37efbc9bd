use tabled::Tabled;

#[derive(Tabled)]
pub struct RequestRow {
    pub method: String,
    pub name: String,
    pub requests: usize,
    pub failed: usize,
    #[tabled(display = "float2")]
    pub avg_ms: f64,
    #[tabled(display = "float2")]
    pub min_ms: f64,
    #[tabled(display = "float2")]
    pub max_ms: f64,
    #[tabled(display = "float2")]
    pub p95_ms: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
