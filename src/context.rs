//! Screen-context injection for the support widgets
//!
//! Maps the dashboard's current screen identifier to a short pt-BR hint and
//! composes it into the assistant's fixed behavior configuration. The hint is
//! read once when a session opens; navigating to another screen does not
//! change a running session.

/// One-sentence context hint for a screen identifier.
///
/// Unrecognized identifiers fall back to a generic sentence naming the
/// screen.
pub fn context_hint(screen: &str) -> String {
    match screen {
        "dashboard" => {
            "O usuário está no Dashboard (Visão Geral). Ajude com métricas e primeiros passos."
        }
        "products" => {
            "O usuário está na Lista de Produtos. Ajude com cálculo de lucro, precificação e edição."
        }
        "orders" => {
            "O usuário está em Pedidos. Ajude com status, envio para fornecedor e rastreio."
        }
        "converter" => {
            "O usuário está no Conversor de Links. Ajude a importar produtos de fornecedores."
        }
        "settings" => {
            "O usuário está em Configurações. Ajude com integração Shopee, pagamentos e taxas."
        }
        "plans" => {
            "O usuário está vendo os Planos. Explique as diferenças de taxas (5% vs 2% vs 1%)."
        }
        "how-it-works" => {
            "O usuário está na página Como Funciona. Tire dúvidas sobre o fluxo (Conexão > Conversão > Venda > Envio)."
        }
        other => return format!("O usuário está na tela: {}.", other),
    }
    .to_string()
}

/// Full system instruction for a session opened on the given screen.
pub fn system_instruction(screen: &str) -> String {
    format!(
        "Você é o Suporte Virtual Inteligente da plataforma 'DropNacional'.\n\
         \n\
         CONTEXTO ATUAL: {}\n\
         \n\
         Sobre a Plataforma:\n\
         - DropNacional é um SaaS para dropshipping com fornecedores brasileiros e Shopee.\n\
         - Foco: Agilidade, fornecedores nacionais e facilidade de uso.\n\
         \n\
         Diretrizes:\n\
         - Responda em Português do Brasil de forma concisa e útil.\n\
         - Use formatação Markdown simples (negrito, listas) para facilitar a leitura.\n\
         - Se não souber algo, sugira entrar em contato com o suporte humano pelo email.",
        context_hint(screen)
    )
}
