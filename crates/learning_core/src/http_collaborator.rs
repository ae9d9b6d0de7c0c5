use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ArticleSection, Curriculum, PresentationSlide, SectionId, Slide, SlideId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        ArticleDraft, ArticleImagesRequest, ArticleImagesResponse, ChatRequest, ChatResponse,
        ConsultRequest, ConsultantReply, CurriculumEditRequest, CurriculumRequest, DraftRequest,
        ImageResolution, ImageSelectionResponse, ModuleContent, ModuleContentRequest,
        NarrationResponse, PresentationDraft, PresentationImagesRequest,
        PresentationImagesResponse, RefinementResult, SlidesRequest,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::{EngineSettings, GenerationCollaborator};

/// JSON-over-HTTP client for the generation gateway.
pub struct HttpCollaborator {
    http: Client,
    base_url: Url,
}

impl HttpCollaborator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid collaborator url '{base_url}'"))?;
        let path = format!("{}/", base_url.path().trim_end_matches('/'));
        base_url.set_path(&path);

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        Self::new(&settings.collaborator_url, settings.request_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid collaborator endpoint '{path}'"))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "collaborator: request");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("collaborator request to '{path}' failed"))?;

        let status = response.status();
        if !status.is_success() {
            let err = match response.json::<ApiError>().await {
                Ok(api_error) => ApiException::from(api_error),
                Err(_) => ApiException::new(
                    ErrorCode::Internal,
                    format!("gateway returned status {status}"),
                ),
            };
            if err.is_retryable() {
                warn!(path, code = ?err.code, "collaborator: gateway busy or unavailable");
            } else {
                warn!(path, code = ?err.code, message = %err.message, "collaborator: request rejected");
            }
            return Err(err.into());
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("invalid response body from '{path}'"))
    }
}

#[async_trait]
impl GenerationCollaborator for HttpCollaborator {
    async fn generate_curriculum_outline(&self, request: CurriculumRequest) -> Result<Curriculum> {
        self.post("curriculum", &request).await
    }

    async fn generate_module_content(
        &self,
        request: ModuleContentRequest,
    ) -> Result<ModuleContent> {
        self.post("modules", &request).await
    }

    async fn select_images_for_module(
        &self,
        slides: Vec<Slide>,
    ) -> Result<BoxStream<'static, ImageResolution>> {
        let response: ImageSelectionResponse = self
            .post("modules/images", &SlidesRequest { slides })
            .await?;
        Ok(futures::stream::iter(response.resolutions).boxed())
    }

    async fn synthesize_narration(&self, slides: Vec<Slide>) -> Result<Vec<Option<String>>> {
        let response: NarrationResponse =
            self.post("narration", &SlidesRequest { slides }).await?;
        Ok(response.audio_refs)
    }

    async fn generate_article(&self, request: DraftRequest) -> Result<ArticleDraft> {
        self.post("articles", &request).await
    }

    async fn fetch_article_images(
        &self,
        sections: Vec<ArticleSection>,
    ) -> Result<HashMap<SectionId, String>> {
        let response: ArticleImagesResponse = self
            .post("articles/images", &ArticleImagesRequest { sections })
            .await?;
        Ok(response.images)
    }

    async fn generate_presentation(&self, request: DraftRequest) -> Result<PresentationDraft> {
        self.post("presentations", &request).await
    }

    async fn fetch_presentation_images(
        &self,
        slides: Vec<PresentationSlide>,
    ) -> Result<HashMap<SlideId, Vec<String>>> {
        let response: PresentationImagesResponse = self
            .post("presentations/images", &PresentationImagesRequest { slides })
            .await?;
        Ok(response.images)
    }

    async fn refine_curriculum_outline(
        &self,
        current: Curriculum,
        instruction: String,
    ) -> Result<RefinementResult> {
        self.post(
            "curriculum/refine",
            &CurriculumEditRequest {
                current,
                instruction,
            },
        )
        .await
    }

    async fn adjust_curriculum_outline(
        &self,
        current: Curriculum,
        instruction: String,
    ) -> Result<Curriculum> {
        self.post(
            "curriculum/adjust",
            &CurriculumEditRequest {
                current,
                instruction,
            },
        )
        .await
    }

    async fn consult_on_topic(&self, request: ConsultRequest) -> Result<ConsultantReply> {
        self.post("consult", &request).await
    }

    async fn chat_reply(&self, request: ChatRequest) -> Result<String> {
        let response: ChatResponse = self.post("chat", &request).await?;
        Ok(response.text)
    }
}

#[cfg(test)]
#[path = "tests/http_collaborator_tests.rs"]
mod tests;
